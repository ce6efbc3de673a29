//! End-to-end tests for the registry engine against scripted collaborators

use async_trait::async_trait;
use axon_core::{DeviceId, DeviceInfo, ResourceHandle, Status, Token};
use axon_registry::{
    DeviceListener, DeviceRegistry, LifecycleState, Operation, RegistryConfig, RegistryError,
    RequestTarget,
};
use axon_transport::{
    DiscoveredResource, DiscoveryFilter, MotDevice, ObserveEvent, ObserveHandle, PinHooks,
    QueryParams, Representation, Response, ResultCode, SecurityProvider, TransferMethod, Transport,
    TransportError,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

const HOST: &str = "coap://192.168.1.40:5683";

// ── Mock transport ───────────────────────────────────────────────

#[derive(Default)]
struct MockTransport {
    sinks: Mutex<Vec<mpsc::UnboundedSender<DiscoveredResource>>>,
    discover_calls: Mutex<Vec<(Option<String>, Option<String>)>>,
    device_info: Mutex<HashMap<String, Representation>>,
    platform_info: Mutex<HashMap<String, Representation>>,
    device_info_calls: AtomicUsize,
    platform_info_calls: AtomicUsize,
    get_calls: Mutex<Vec<String>>,
    get_response: Mutex<Option<Response>>,
    post_calls: Mutex<Vec<String>>,
    delete_calls: Mutex<Vec<String>>,
    observe_sinks: Mutex<HashMap<u64, mpsc::UnboundedSender<ObserveEvent>>>,
    cancelled_observes: Mutex<Vec<u64>>,
    next_observe: AtomicUsize,
}

impl MockTransport {
    /// Deliver a discovery event on the most recent request's sink
    fn emit(&self, found: DiscoveredResource) {
        let sinks = self.sinks.lock().unwrap();
        if let Some(sink) = sinks.last() {
            let _ = sink.send(found);
        }
    }

    fn set_device_info(&self, host: &str, rep: Representation) {
        self.device_info.lock().unwrap().insert(host.to_string(), rep);
    }

    fn set_platform_info(&self, host: &str, rep: Representation) {
        self.platform_info.lock().unwrap().insert(host.to_string(), rep);
    }

    fn push_observe_event(&self, event: ObserveEvent) {
        for sink in self.observe_sinks.lock().unwrap().values() {
            let _ = sink.send(event.clone());
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn discover(
        &self,
        host: Option<String>,
        filter: DiscoveryFilter,
        found: mpsc::UnboundedSender<DiscoveredResource>,
    ) -> Result<(), TransportError> {
        self.discover_calls
            .lock()
            .unwrap()
            .push((host, filter.resource_type));
        self.sinks.lock().unwrap().push(found);
        Ok(())
    }

    async fn fetch_device_info(&self, host: &str) -> Result<Representation, TransportError> {
        self.device_info_calls.fetch_add(1, Ordering::SeqCst);
        self.device_info
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .ok_or(TransportError::Unreachable)
    }

    async fn fetch_platform_info(&self, host: &str) -> Result<Representation, TransportError> {
        self.platform_info_calls.fetch_add(1, Ordering::SeqCst);
        self.platform_info
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .ok_or(TransportError::Unreachable)
    }

    async fn get(
        &self,
        resource: &ResourceHandle,
        _query: QueryParams,
    ) -> Result<Response, TransportError> {
        self.get_calls.lock().unwrap().push(resource.uri.clone());
        Ok(self.get_response.lock().unwrap().clone().unwrap_or(Response {
            code: ResultCode::Ok,
            representation: Some(Representation::new()),
        }))
    }

    async fn post(
        &self,
        resource: &ResourceHandle,
        _query: QueryParams,
        _body: Representation,
    ) -> Result<Response, TransportError> {
        self.post_calls.lock().unwrap().push(resource.uri.clone());
        Ok(Response {
            code: ResultCode::Changed,
            representation: None,
        })
    }

    async fn delete(&self, resource: &ResourceHandle) -> Result<Response, TransportError> {
        self.delete_calls.lock().unwrap().push(resource.uri.clone());
        Ok(Response {
            code: ResultCode::Deleted,
            representation: None,
        })
    }

    async fn observe(
        &self,
        _resource: &ResourceHandle,
        _query: QueryParams,
        events: mpsc::UnboundedSender<ObserveEvent>,
    ) -> Result<ObserveHandle, TransportError> {
        let id = self.next_observe.fetch_add(1, Ordering::SeqCst) as u64;
        self.observe_sinks.lock().unwrap().insert(id, events);
        Ok(ObserveHandle(id))
    }

    async fn cancel_observe(&self, handle: ObserveHandle) -> Result<(), TransportError> {
        self.cancelled_observes.lock().unwrap().push(handle.0);
        self.observe_sinks.lock().unwrap().remove(&handle.0);
        Ok(())
    }
}

// ── Mock security provider ───────────────────────────────────────

enum TransferMode {
    Complete(Result<(), TransportError>),
    Pending,
}

struct MockMotDevice {
    subowner: bool,
    method: TransferMethod,
    mode: TransferMode,
    installed_pins: Mutex<Vec<String>>,
    pending: Mutex<Option<oneshot::Sender<Result<(), TransportError>>>>,
    transfer_started: AtomicUsize,
}

impl MockMotDevice {
    fn new(subowner: bool, method: TransferMethod, mode: TransferMode) -> Arc<Self> {
        Arc::new(Self {
            subowner,
            method,
            mode,
            installed_pins: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            transfer_started: AtomicUsize::new(0),
        })
    }

    fn complete_transfer(&self, outcome: Result<(), TransportError>) {
        if let Some(done) = self.pending.lock().unwrap().take() {
            let _ = done.send(outcome);
        }
    }
}

#[async_trait]
impl MotDevice for MockMotDevice {
    async fn is_subowner(&self) -> Result<bool, TransportError> {
        Ok(self.subowner)
    }

    fn selected_transfer_method(&self) -> TransferMethod {
        self.method
    }

    async fn set_preconfigured_pin(&self, pin: &str) -> Result<(), TransportError> {
        if pin.is_empty() {
            return Err(TransportError::Rejected("empty pin".to_string()));
        }
        self.installed_pins.lock().unwrap().push(pin.to_string());
        Ok(())
    }

    fn begin_transfer(&self, done: oneshot::Sender<Result<(), TransportError>>) {
        self.transfer_started.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            TransferMode::Complete(outcome) => {
                let _ = done.send(outcome.clone());
            }
            TransferMode::Pending => {
                *self.pending.lock().unwrap() = Some(done);
            }
        }
    }
}

#[derive(Default)]
struct MockSecurity {
    device: Mutex<Option<Arc<MockMotDevice>>>,
    hooks: Mutex<Option<Arc<dyn PinHooks>>>,
}

impl MockSecurity {
    fn set_device(&self, device: Arc<MockMotDevice>) {
        *self.device.lock().unwrap() = Some(device);
    }

    fn hooks(&self) -> Option<Arc<dyn PinHooks>> {
        self.hooks.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecurityProvider for MockSecurity {
    async fn discover_mot_device(
        &self,
        _timeout: Duration,
        _device: Uuid,
    ) -> Result<Option<Arc<dyn MotDevice>>, TransportError> {
        Ok(self
            .device
            .lock()
            .unwrap()
            .clone()
            .map(|d| d as Arc<dyn MotDevice>))
    }

    fn register_pin_hooks(&self, hooks: Arc<dyn PinHooks>) {
        *self.hooks.lock().unwrap() = Some(hooks);
    }

    fn unregister_pin_hooks(&self) {
        *self.hooks.lock().unwrap() = None;
    }
}

// ── Recording listener ───────────────────────────────────────────

#[derive(Default)]
struct RecordingListener {
    discoveries: Mutex<Vec<(bool, bool, String, BTreeSet<String>)>>,
    gets: Mutex<Vec<(Status, Token)>>,
    sets: Mutex<Vec<(Status, Token)>>,
    deletes: Mutex<Vec<(Status, Token)>>,
    observes: Mutex<Vec<(Status, u32, Token)>>,
    access: Mutex<Vec<(Status, Token)>>,
    displayed: Mutex<Vec<String>>,
    pin: Option<String>,
}

impl RecordingListener {
    fn lost_count(&self) -> usize {
        self.discoveries
            .lock()
            .unwrap()
            .iter()
            .filter(|(responding, _, _, _)| !responding)
            .count()
    }
}

impl DeviceListener for RecordingListener {
    fn on_device_discovery(
        &self,
        responding: bool,
        updated: bool,
        device: &DeviceInfo,
        discovered_types: &BTreeSet<String>,
    ) {
        self.discoveries.lock().unwrap().push((
            responding,
            updated,
            device.device_id.clone(),
            discovered_types.clone(),
        ));
    }

    fn on_get_complete(&self, status: Status, _rep: Option<&Representation>, token: Token) {
        self.gets.lock().unwrap().push((status, token));
    }

    fn on_set_complete(&self, status: Status, _rep: Option<&Representation>, token: Token) {
        self.sets.lock().unwrap().push((status, token));
    }

    fn on_delete_complete(&self, status: Status, token: Token) {
        self.deletes.lock().unwrap().push((status, token));
    }

    fn on_observe_update(
        &self,
        status: Status,
        _rep: &Representation,
        sequence: u32,
        token: Token,
    ) {
        self.observes.lock().unwrap().push((status, sequence, token));
    }

    fn on_password_input(&self, _device: &DeviceId, _method: TransferMethod) -> Option<String> {
        self.pin.clone()
    }

    fn on_password_display(&self, _device: &DeviceId, _method: TransferMethod, password: &str) {
        self.displayed.lock().unwrap().push(password.to_string());
    }

    fn on_request_access_complete(&self, status: Status, token: Token) {
        self.access.lock().unwrap().push((status, token));
    }
}

// ── Harness ──────────────────────────────────────────────────────

struct Harness {
    registry: DeviceRegistry,
    transport: Arc<MockTransport>,
    security: Arc<MockSecurity>,
    listener: Arc<RecordingListener>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with_listener(RecordingListener::default()).await
    }

    async fn start_with_listener(listener: RecordingListener) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let transport = Arc::new(MockTransport::default());
        let security = Arc::new(MockSecurity::default());
        let listener = Arc::new(listener);
        let registry = DeviceRegistry::new(
            RegistryConfig::default(),
            transport.clone(),
            security.clone(),
        );
        registry.register_listener(listener.clone());
        registry.start().await.expect("start");
        registry
            .discover(&[DiscoveryFilter::all()])
            .await
            .expect("initial discovery");
        Self {
            registry,
            transport,
            security,
            listener,
        }
    }

    /// Let the event pump and spawned completion tasks run
    async fn settle(&self) {
        sleep(Duration::from_millis(25)).await;
    }
}

fn resource(device: &str, uri: &str, host: &str, types: &[&str]) -> DiscoveredResource {
    DiscoveredResource {
        device_id: device.to_string(),
        uri: uri.to_string(),
        host: host.to_string(),
        resource_types: types.iter().map(|t| t.to_string()).collect(),
        resource_interfaces: ["oic.if.baseline".to_string()].into(),
        observable: true,
    }
}

fn uuid_device() -> String {
    "936da01f-9abd-4d9d-80c7-02af85c822a8".to_string()
}

// ── Discovery and reconciliation ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn discovery_registers_device_and_unions_types() {
    let h = Harness::start().await;

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;

    let id = DeviceId::new("d1");
    let devices = h.registry.devices().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].discovered_types, BTreeSet::from(["t1".to_string()]));
    assert_eq!(
        h.registry.device_by_host(HOST).await.expect("by host").id,
        id
    );
    assert!(matches!(
        h.registry.device_info(&id).await,
        Err(RegistryError::InformationNotAvailable(_))
    ));

    h.transport.emit(resource("d1", "/b", HOST, &["t2"]));
    h.settle().await;

    let devices = h.registry.devices().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(
        devices[0].discovered_types,
        BTreeSet::from(["t1".to_string(), "t2".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn new_device_triggers_scoped_discovery_and_metadata_fetch() {
    let h = Harness::start().await;

    let mut device_rep = Representation::new();
    device_rep.set("n", "Kitchen Light");
    device_rep.set("icv", "ocf.2.0.5");
    h.transport.set_device_info(HOST, device_rep);

    let mut platform_rep = Representation::new();
    platform_rep.set("mnmn", "CogniPilot");
    h.transport.set_platform_info(HOST, platform_rep);

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;

    // Follow-up discovery was scoped to the responding host.
    let discoveries = h.transport.discover_calls.lock().unwrap().clone();
    assert!(discoveries.contains(&(Some(HOST.to_string()), None)));

    let id = DeviceId::new("d1");
    let info = h.registry.device_info(&id).await.expect("device info");
    assert_eq!(info.name, "Kitchen Light");
    assert_eq!(info.software_version, "ocf.2.0.5");
    let platform = h.registry.platform_info(&id).await.expect("platform info");
    assert_eq!(platform.manufacturer_name, "CogniPilot");

    // Metadata completion was announced as an update.
    let discoveries = h.listener.discoveries.lock().unwrap();
    assert!(discoveries.iter().any(|(responding, updated, device, _)| {
        *responding && *updated && device == "d1"
    }));
}

#[tokio::test(start_paused = true)]
async fn metadata_fetch_attempts_are_capped() {
    let h = Harness::start().await;

    // No metadata configured: every fetch fails and burns one attempt.
    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;

    // Plenty of sweep ticks to retry far past the cap.
    sleep(Duration::from_secs(30)).await;
    h.settle().await;

    assert_eq!(h.transport.device_info_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.transport.platform_info_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn duplicate_metadata_completion_is_ignored() {
    let h = Harness::start().await;

    let mut first = Representation::new();
    first.set("n", "Original");
    h.transport.set_device_info(HOST, first);

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;

    // A later response for the same field must not overwrite the first.
    let mut second = Representation::new();
    second.set("n", "Imposter");
    h.transport.set_device_info(HOST, second);
    sleep(Duration::from_secs(4)).await;
    h.settle().await;

    let info = h
        .registry
        .device_info(&DeviceId::new("d1"))
        .await
        .expect("device info");
    assert_eq!(info.name, "Original");
}

// ── Staleness sweeper ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sweeper_evicts_unused_device() {
    let h = Harness::start().await;

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;
    assert_eq!(h.registry.devices().await.len(), 1);

    sleep(Duration::from_secs(305)).await;
    h.settle().await;
    assert!(h.registry.devices().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn open_device_is_never_evicted() {
    let h = Harness::start().await;
    let id = DeviceId::new("d1");

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;
    h.registry.open_device(&id).await.expect("open");

    sleep(Duration::from_secs(400)).await;
    h.settle().await;
    assert_eq!(h.registry.devices().await.len(), 1);

    // The idle clock starts at the last close.
    h.registry.close_device(&id).await.expect("close");
    sleep(Duration::from_secs(305)).await;
    h.settle().await;
    assert!(h.registry.devices().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_device_is_flagged_once_until_next_discovery() {
    let h = Harness::start().await;
    let id = DeviceId::new("d1");

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;
    h.registry.open_device(&id).await.expect("open");

    sleep(Duration::from_secs(63)).await;
    h.settle().await;
    assert_eq!(h.listener.lost_count(), 1);
    assert!(h.registry.device(&id).await.expect("record").not_responding);

    // The flag is latched: further ticks emit no additional notification.
    sleep(Duration::from_secs(10)).await;
    h.settle().await;
    assert_eq!(h.listener.lost_count(), 1);

    // The very next discovery response clears the flag.
    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;
    assert!(!h.registry.device(&id).await.expect("record").not_responding);

    // And the silence threshold arms again afterwards.
    sleep(Duration::from_secs(63)).await;
    h.settle().await;
    assert_eq!(h.listener.lost_count(), 2);
}

// ── Command dispatch ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dispatch_get_reports_completion_with_token() {
    let h = Harness::start().await;
    let id = DeviceId::new("d1");

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;

    let token = h
        .registry
        .dispatch(&id, RequestTarget::path("/a"), Operation::GetProperties)
        .await
        .expect("dispatch");
    h.settle().await;

    assert_eq!(h.transport.get_calls.lock().unwrap().clone(), vec!["/a"]);
    assert_eq!(h.listener.gets.lock().unwrap().clone(), vec![(Status::Ok, token)]);
}

#[tokio::test(start_paused = true)]
async fn dispatch_falls_back_to_first_resource_of_type() {
    let h = Harness::start().await;
    let id = DeviceId::new("d1");

    h.transport
        .emit(resource("d1", "/switch/1", HOST, &["oic.r.switch.binary"]));
    h.settle().await;

    let target = RequestTarget {
        path: "/does/not/exist".to_string(),
        resource_type: Some("oic.r.switch.binary".to_string()),
        interface: None,
    };
    h.registry
        .dispatch(&id, target, Operation::GetProperties)
        .await
        .expect("dispatch");
    h.settle().await;

    assert_eq!(
        h.transport.get_calls.lock().unwrap().clone(),
        vec!["/switch/1"]
    );
}

#[tokio::test(start_paused = true)]
async fn dispatch_set_delete_report_mapped_statuses() {
    let h = Harness::start().await;
    let id = DeviceId::new("d1");

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;

    let set_token = h
        .registry
        .dispatch(
            &id,
            RequestTarget::path("/a"),
            Operation::SetProperties(Representation::new()),
        )
        .await
        .expect("set");
    let delete_token = h
        .registry
        .dispatch(&id, RequestTarget::path("/a"), Operation::DeleteResource)
        .await
        .expect("delete");
    h.settle().await;

    assert_eq!(h.transport.post_calls.lock().unwrap().clone(), vec!["/a"]);
    assert_eq!(h.transport.delete_calls.lock().unwrap().clone(), vec!["/a"]);
    assert_eq!(
        h.listener.sets.lock().unwrap().clone(),
        vec![(Status::Ok, set_token)]
    );
    assert_eq!(
        h.listener.deletes.lock().unwrap().clone(),
        vec![(Status::ResourceDeleted, delete_token)]
    );
}

#[tokio::test(start_paused = true)]
async fn dispatch_reports_caller_errors_synchronously() {
    let h = Harness::start().await;

    let unknown = h
        .registry
        .dispatch(
            &DeviceId::new("ghost"),
            RequestTarget::path("/a"),
            Operation::GetProperties,
        )
        .await;
    match unknown {
        Err(e) => assert_eq!(e.status(), Status::DeviceNotDiscovered),
        Ok(_) => panic!("expected device-not-discovered"),
    }

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;
    let missing = h
        .registry
        .dispatch(
            &DeviceId::new("d1"),
            RequestTarget::path("/nope"),
            Operation::GetProperties,
        )
        .await;
    match missing {
        Err(e) => assert_eq!(e.status(), Status::ResourceNotFound),
        Ok(_) => panic!("expected resource-not-found"),
    }
}

#[tokio::test(start_paused = true)]
async fn observe_start_stop_roundtrip() {
    let h = Harness::start().await;
    let id = DeviceId::new("d1");

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;
    assert!(h
        .registry
        .is_resource_observable(&id, "/a")
        .await
        .expect("observable"));

    let token = h
        .registry
        .dispatch(&id, RequestTarget::path("/a"), Operation::StartObserve)
        .await
        .expect("observe");

    let mut rep = Representation::new();
    rep.set("state", true);
    h.transport.push_observe_event(ObserveEvent {
        code: ResultCode::Ok,
        representation: rep,
        sequence: 5,
    });
    h.settle().await;

    assert_eq!(
        h.listener.observes.lock().unwrap().clone(),
        vec![(Status::Ok, 5, token)]
    );

    h.registry.stop_observe(token).await.expect("stop observe");
    assert_eq!(h.transport.cancelled_observes.lock().unwrap().len(), 1);

    // Cancelling an observe that is not running is a caller error.
    match h.registry.stop_observe(token).await {
        Err(RegistryError::ObserveNotActive(t)) => assert_eq!(t, token),
        other => panic!("expected observe-not-active, got {other:?}"),
    }
}

// ── Security provisioning ────────────────────────────────────────

async fn provisioned_harness(device: Arc<MockMotDevice>, listener: RecordingListener) -> Harness {
    let h = Harness::start_with_listener(listener).await;
    h.security.set_device(device);
    h.transport
        .emit(resource(&uuid_device(), "/a", HOST, &["t1"]));
    h.settle().await;
    h
}

#[tokio::test(start_paused = true)]
async fn request_access_completes_via_transfer() {
    let mot = MockMotDevice::new(false, TransferMethod::RandomPin, TransferMode::Complete(Ok(())));
    let h = provisioned_harness(mot.clone(), RecordingListener::default()).await;
    let id = DeviceId::new(uuid_device());

    let token = Token(42);
    h.registry.request_access(&id, token).await.expect("request access");
    h.settle().await;

    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateFinished, token)]
    );
    let record = h.registry.device(&id).await.expect("record");
    assert!(record.security.subowner);
    assert!(!record.security.in_progress);
}

#[tokio::test(start_paused = true)]
async fn request_access_rejects_concurrent_attempt() {
    let mot = MockMotDevice::new(false, TransferMethod::RandomPin, TransferMode::Pending);
    let h = provisioned_harness(mot.clone(), RecordingListener::default()).await;
    let id = DeviceId::new(uuid_device());

    h.registry.request_access(&id, Token(1)).await.expect("first");
    h.settle().await;

    // The second call fails synchronously, without touching the first.
    match h.registry.request_access(&id, Token(2)).await {
        Err(RegistryError::AccessInProgress(device)) => assert_eq!(device, id),
        other => panic!("expected access-in-progress, got {other:?}"),
    }

    mot.complete_transfer(Ok(()));
    h.settle().await;
    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateFinished, Token(1))]
    );

    // The gate resets after the terminal outcome, so a retry is admitted.
    h.registry.request_access(&id, Token(3)).await.expect("retry");
    h.settle().await;
}

#[tokio::test(start_paused = true)]
async fn request_access_short_circuits_for_subowner() {
    let mot = MockMotDevice::new(true, TransferMethod::RandomPin, TransferMode::Pending);
    let h = provisioned_harness(mot.clone(), RecordingListener::default()).await;
    let id = DeviceId::new(uuid_device());

    h.registry.request_access(&id, Token(7)).await.expect("request access");
    h.settle().await;

    assert_eq!(mot.transfer_started.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateFinished, Token(7))]
    );
}

#[tokio::test(start_paused = true)]
async fn request_access_installs_preconfigured_pin() {
    let mot = MockMotDevice::new(
        false,
        TransferMethod::PreconfiguredPin,
        TransferMode::Complete(Ok(())),
    );
    let listener = RecordingListener {
        pin: Some("1234".to_string()),
        ..RecordingListener::default()
    };
    let h = provisioned_harness(mot.clone(), listener).await;
    let id = DeviceId::new(uuid_device());

    h.registry.request_access(&id, Token(9)).await.expect("request access");
    h.settle().await;

    assert_eq!(mot.installed_pins.lock().unwrap().clone(), vec!["1234"]);
    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateFinished, Token(9))]
    );
}

#[tokio::test(start_paused = true)]
async fn request_access_fails_when_pin_install_fails() {
    // No listener supplies a PIN, so the install is rejected.
    let mot = MockMotDevice::new(
        false,
        TransferMethod::PreconfiguredPin,
        TransferMode::Complete(Ok(())),
    );
    let h = provisioned_harness(mot.clone(), RecordingListener::default()).await;
    let id = DeviceId::new(uuid_device());

    h.registry.request_access(&id, Token(4)).await.expect("request access");
    h.settle().await;

    assert_eq!(mot.transfer_started.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateFailed, Token(4))]
    );
}

#[tokio::test(start_paused = true)]
async fn request_access_reports_unsupported_method() {
    let mot = MockMotDevice::new(false, TransferMethod::Unsupported, TransferMode::Pending);
    let h = provisioned_harness(mot, RecordingListener::default()).await;
    let id = DeviceId::new(uuid_device());

    h.registry.request_access(&id, Token(5)).await.expect("request access");
    h.settle().await;

    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateNotSupported, Token(5))]
    );
}

#[tokio::test(start_paused = true)]
async fn request_access_times_out_when_transfer_never_completes() {
    let mot = MockMotDevice::new(false, TransferMethod::RandomPin, TransferMode::Pending);
    let h = provisioned_harness(mot, RecordingListener::default()).await;
    let id = DeviceId::new(uuid_device());

    h.registry.request_access(&id, Token(6)).await.expect("request access");
    sleep(Duration::from_secs(31)).await;
    h.settle().await;

    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateFailed, Token(6))]
    );
    // The attempt is terminal; the gate is open for a retry.
    assert!(!h
        .registry
        .device(&id)
        .await
        .expect("record")
        .security
        .in_progress);
}

#[tokio::test(start_paused = true)]
async fn request_access_reports_undiscovered_capability_probe() {
    // Security provider has no MOT device to offer.
    let h = Harness::start().await;
    h.transport
        .emit(resource(&uuid_device(), "/a", HOST, &["t1"]));
    h.settle().await;

    let id = DeviceId::new(uuid_device());
    h.registry.request_access(&id, Token(8)).await.expect("request access");
    h.settle().await;

    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::DeviceNotDiscovered, Token(8))]
    );
}

#[tokio::test(start_paused = true)]
async fn request_access_requires_known_device_and_running_registry() {
    let h = Harness::start().await;

    match h.registry.request_access(&DeviceId::new(uuid_device()), Token(1)).await {
        Err(RegistryError::DeviceNotDiscovered(_)) => {}
        other => panic!("expected device-not-discovered, got {other:?}"),
    }

    h.registry.stop().await.expect("stop");
    match h.registry.request_access(&DeviceId::new(uuid_device()), Token(2)).await {
        Err(RegistryError::NotRunning) => {}
        other => panic!("expected not-running, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stop_drains_inflight_provisioning_attempt() {
    let mot = MockMotDevice::new(false, TransferMethod::RandomPin, TransferMode::Pending);
    let h = provisioned_harness(mot, RecordingListener::default()).await;
    let id = DeviceId::new(uuid_device());

    h.registry.request_access(&id, Token(11)).await.expect("request access");
    h.settle().await;

    h.registry.stop().await.expect("stop");
    assert_eq!(h.registry.state(), LifecycleState::Stopped);
    assert_eq!(
        h.listener.access.lock().unwrap().clone(),
        vec![(Status::SecurityUpdateFailed, Token(11))]
    );
}

#[tokio::test(start_paused = true)]
async fn pin_hooks_bridge_to_listeners() {
    let listener = RecordingListener {
        pin: Some("9876".to_string()),
        ..RecordingListener::default()
    };
    let h = Harness::start_with_listener(listener).await;

    let hooks = h.security.hooks().expect("hooks registered on start");
    assert_eq!(
        hooks.pin_input("d1", TransferMethod::RandomPin),
        Some("9876".to_string())
    );
    hooks.pin_display("d1", TransferMethod::RandomPin, "4321");
    assert_eq!(h.listener.displayed.lock().unwrap().clone(), vec!["4321"]);

    h.registry.stop().await.expect("stop");
    assert!(h.security.hooks().is_none());
}

// ── Listener registry ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unregistered_listener_stops_receiving() {
    let h = Harness::start().await;

    let second = Arc::new(RecordingListener::default());
    h.registry.register_listener(second.clone());

    h.transport.emit(resource("d1", "/a", HOST, &["t1"]));
    h.settle().await;
    let first_before = h.listener.discoveries.lock().unwrap().len();
    let second_before = second.discoveries.lock().unwrap().len();
    assert!(first_before > 0);
    assert_eq!(first_before, second_before);

    let as_dyn: Arc<dyn DeviceListener> = second.clone();
    h.registry.unregister_listener(&as_dyn);

    h.transport.emit(resource("d1", "/b", HOST, &["t2"]));
    h.settle().await;
    assert!(h.listener.discoveries.lock().unwrap().len() > first_before);
    assert_eq!(second.discoveries.lock().unwrap().len(), second_before);
}

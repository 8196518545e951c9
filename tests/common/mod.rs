#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use region_image_publisher::error::DriverError;
use region_image_publisher::models::{
    Accessibility, Ami, AmiProperties, ObjectHead, SignedAction, SignedCapability,
    Snapshot, VirtualizationType, Volume,
};
use region_image_publisher::services::drivers::{
    AmiDriver, DriverSet, MachineImageDriver, PublishContext, ResourceDriver, SnapshotDriver,
    VolumeDriver,
};
use region_image_publisher::services::machine_image::MachineImagePublisher;
use region_image_publisher::services::storage::{ObjectStore, PutOptions};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn snapshot_events(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

#[derive(Debug, Clone)]
pub struct MockObject {
    pub data: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub content_type: Option<String>,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<String, MockObject>,
    multipart: HashMap<String, (String, PutOptions, BTreeMap<i32, Vec<u8>>)>,
    issued: HashSet<String>,
    size_overrides: HashMap<String, u64>,
    now: Option<DateTime<Utc>>,
}

/// In-memory bucket that validates signed URLs against its own clock.
pub struct MockObjectStore {
    bucket: String,
    state: Mutex<MockState>,
    events: Events,
    next_id: AtomicU32,
    pub fail_part: Mutex<Option<i32>>,
    pub fail_head: Mutex<bool>,
    pub fail_complete: Mutex<bool>,
    pub fail_presign: Mutex<bool>,
    pub presign_delay: Mutex<Option<Duration>>,
    pub fail_delete_keys: Mutex<HashSet<String>>,
}

impl MockObjectStore {
    pub fn new(events: Events) -> Self {
        Self {
            bucket: "stemcells".to_string(),
            state: Mutex::new(MockState::default()),
            events,
            next_id: AtomicU32::new(1),
            fail_part: Mutex::new(None),
            fail_head: Mutex::new(false),
            fail_complete: Mutex::new(false),
            fail_presign: Mutex::new(false),
            presign_delay: Mutex::new(None),
            fail_delete_keys: Mutex::new(HashSet::new()),
        }
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().now.unwrap_or_else(Utc::now)
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state.lock().unwrap().now = Some(now);
    }

    pub fn seed(&self, key: &str, data: Vec<u8>, metadata: HashMap<String, String>) {
        self.state.lock().unwrap().objects.insert(
            key.to_string(),
            MockObject {
                data,
                metadata,
                content_type: None,
            },
        );
    }

    /// Makes probes report `size` for `key` regardless of the stored bytes.
    pub fn override_size(&self, key: &str, size: u64) {
        self.state
            .lock()
            .unwrap()
            .size_overrides
            .insert(key.to_string(), size);
    }

    pub fn object(&self, key: &str) -> Option<MockObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.state.lock().unwrap().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, data: Vec<u8>, options: &PutOptions) -> Result<()> {
        self.record(format!("put {}", key));
        self.state.lock().unwrap().objects.insert(
            key.to_string(),
            MockObject {
                data,
                metadata: options.metadata.clone(),
                content_type: options.content_type.clone(),
            },
        );
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, options: &PutOptions) -> Result<String> {
        let upload_id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.record(format!("multipart {}", key));
        self.state.lock().unwrap().multipart.insert(
            upload_id.clone(),
            (key.to_string(), options.clone(), BTreeMap::new()),
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String> {
        if *self.fail_part.lock().unwrap() == Some(part_number) {
            return Err(anyhow!("connection reset"));
        }
        self.record(format!("part {} {}", key, part_number));
        let mut state = self.state.lock().unwrap();
        let (_, _, parts) = state
            .multipart
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload"))?;
        parts.insert(part_number, data);
        Ok(format!("etag-{}", part_number))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()> {
        if *self.fail_complete.lock().unwrap() {
            return Err(anyhow!("InvalidPartOrder"));
        }
        self.record(format!("complete {}", key));
        let mut state = self.state.lock().unwrap();
        let (_, options, uploaded) = state
            .multipart
            .remove(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload"))?;
        let mut data = Vec::new();
        for (part_number, etag) in parts {
            if etag != format!("etag-{}", part_number) {
                return Err(anyhow!("InvalidPart {}", part_number));
            }
            let chunk = uploaded
                .get(&part_number)
                .ok_or_else(|| anyhow!("InvalidPart {}", part_number))?;
            data.extend_from_slice(chunk);
        }
        state.objects.insert(
            key.to_string(),
            MockObject {
                data,
                metadata: options.metadata,
                content_type: options.content_type,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.record(format!("abort {}", key));
        self.state.lock().unwrap().multipart.remove(upload_id);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>> {
        if *self.fail_head.lock().unwrap() {
            return Err(anyhow!("503 SlowDown"));
        }
        let state = self.state.lock().unwrap();
        Ok(state.objects.get(key).map(|object| ObjectHead {
            size: state
                .size_overrides
                .get(key)
                .copied()
                .unwrap_or(object.data.len() as u64),
            metadata: object.metadata.clone(),
        }))
    }

    async fn presign(
        &self,
        action: SignedAction,
        key: &str,
        expires_in: Duration,
    ) -> Result<SignedCapability> {
        if *self.fail_presign.lock().unwrap() {
            return Err(anyhow!("InvalidAccessKeyId"));
        }
        let delay = *self.presign_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(format!("presign {} {}", action.as_str(), key));
        let issued_at = self.now();
        let expires_at = issued_at + chrono::Duration::from_std(expires_in)?;
        let url = format!(
            "https://{}.s3.mock/{}?X-Amz-Method={}&X-Amz-Expires={}&X-Amz-Signature={}",
            self.bucket,
            key,
            action.as_str(),
            expires_in.as_secs(),
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        self.state.lock().unwrap().issued.insert(url.clone());
        Ok(SignedCapability {
            action,
            key: key.to_string(),
            url,
            issued_at,
            expires_at,
        })
    }

    async fn invoke_delete(&self, capability: &SignedCapability) -> Result<()> {
        if capability.action != SignedAction::Delete {
            return Err(anyhow!("403 SignatureDoesNotMatch"));
        }
        if !capability.is_valid_at(self.now()) {
            return Err(anyhow!("403 Request has expired"));
        }
        if self.fail_delete_keys.lock().unwrap().contains(&capability.key) {
            return Err(anyhow!("500 InternalError"));
        }
        let mut state = self.state.lock().unwrap();
        if !state.issued.contains(&capability.url) {
            return Err(anyhow!("403 SignatureDoesNotMatch"));
        }
        state.objects.remove(&capability.key);
        drop(state);
        self.record(format!("delete {}", capability.key));
        Ok(())
    }
}

/// A driver that records calls and can be told to fail.
pub struct FakeDriver<R> {
    label: &'static str,
    make: fn(u32) -> R,
    id_of: fn(&R) -> String,
    events: Events,
    counter: AtomicU32,
    pub fail_create: Mutex<bool>,
    pub fail_delete: Mutex<bool>,
    pub create_delay: Mutex<Option<Duration>>,
    pub configs: Mutex<Vec<String>>,
}

impl<R> FakeDriver<R> {
    pub fn new(label: &'static str, make: fn(u32) -> R, id_of: fn(&R) -> String, events: Events) -> Self {
        Self {
            label,
            make,
            id_of,
            events,
            counter: AtomicU32::new(1),
            fail_create: Mutex::new(false),
            fail_delete: Mutex::new(false),
            create_delay: Mutex::new(None),
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(self) -> Self {
        *self.fail_create.lock().unwrap() = true;
        self
    }
}

#[async_trait]
impl<C, R> ResourceDriver<C, R> for FakeDriver<R>
where
    C: std::fmt::Debug + Send + 'static,
    R: Send + Sync + 'static,
{
    async fn create(&self, _ctx: &PublishContext, config: C) -> Result<R, DriverError> {
        self.configs.lock().unwrap().push(format!("{:?}", config));
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_create.lock().unwrap() {
            self.events
                .lock()
                .unwrap()
                .push(format!("create {} failed", self.label));
            return Err(DriverError::Provider(anyhow!("{} quota exceeded", self.label)));
        }
        let resource = (self.make)(self.counter.fetch_add(1, Ordering::SeqCst));
        self.events
            .lock()
            .unwrap()
            .push(format!("create {} {}", self.label, (self.id_of)(&resource)));
        Ok(resource)
    }

    async fn delete(&self, _ctx: &PublishContext, resource: &R) -> Result<(), DriverError> {
        if *self.fail_delete.lock().unwrap() {
            return Err(DriverError::Provider(anyhow!("{} in use", self.label)));
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("delete {} {}", self.label, (self.id_of)(resource)));
        Ok(())
    }
}

pub fn volume_driver(events: Events) -> FakeDriver<Volume> {
    FakeDriver::new(
        "volume",
        |n| Volume {
            id: format!("vol-{}", n),
        },
        |v: &Volume| v.id.clone(),
        events,
    )
}

pub fn snapshot_driver(events: Events) -> FakeDriver<Snapshot> {
    FakeDriver::new(
        "snapshot",
        |n| Snapshot {
            id: format!("snap-{}", n),
        },
        |s: &Snapshot| s.id.clone(),
        events,
    )
}

pub fn ami_driver(events: Events) -> FakeDriver<Ami> {
    FakeDriver::new(
        "ami",
        |n| Ami {
            id: format!("ami-{}", n),
            region: "us-iso-east-1".to_string(),
            virtualization_type: VirtualizationType::Hvm,
            accessibility: Accessibility::Private,
        },
        |a: &Ami| a.id.clone(),
        events,
    )
}

pub struct TestDrivers {
    pub machine_image: MachineImagePublisher,
    pub volume: FakeDriver<Volume>,
    pub snapshot: FakeDriver<Snapshot>,
    pub ami: FakeDriver<Ami>,
}

impl TestDrivers {
    pub fn new(store: Arc<MockObjectStore>, events: Events) -> Self {
        Self {
            machine_image: MachineImagePublisher::new(store),
            volume: volume_driver(events.clone()),
            snapshot: snapshot_driver(events.clone()),
            ami: ami_driver(events),
        }
    }
}

impl DriverSet for TestDrivers {
    fn machine_image_driver(&self) -> &MachineImageDriver {
        &self.machine_image
    }

    fn volume_driver(&self) -> &VolumeDriver {
        &self.volume
    }

    fn snapshot_driver(&self) -> &SnapshotDriver {
        &self.snapshot
    }

    fn ami_driver(&self) -> &AmiDriver {
        &self.ami
    }
}

pub fn ami_properties() -> AmiProperties {
    AmiProperties {
        name: "bosh-stemcell-1.2-hvm".to_string(),
        description: "BOSH stemcell".to_string(),
        accessibility: Accessibility::Private,
        virtualization_type: VirtualizationType::Hvm,
        tags: BTreeMap::from([("distro".to_string(), "ubuntu".to_string())]),
    }
}

pub fn write_image(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

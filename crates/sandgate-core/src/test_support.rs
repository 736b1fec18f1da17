//! Scriptable in-memory `ControlPlane` shared by the core unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use sandgate_types::control_plane::{OrganizationDto, RunnerDto, SandboxInfoDto, SnapshotDto};
use sandgate_types::error::ControlPlaneError;
use sandgate_types::sandbox::{SandboxState, WakeOnRequest};

use crate::cache::BoxCacheStore;
use crate::cache::memory::MemoryCacheStore;
use crate::control_plane::ControlPlane;

/// How a yes/no endpoint answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    /// Fail `n` times with a 503, then answer yes.
    FlakyThenYes(usize),
    /// Always fail with a 503.
    Down,
}

#[derive(Default)]
pub struct Calls {
    pub runner_by_sandbox: AtomicUsize,
    pub runner: AtomicUsize,
    pub snapshot: AtomicUsize,
    pub organizations: AtomicUsize,
    pub info: AtomicUsize,
    pub public: AtomicUsize,
    pub auth_token: AtomicUsize,
    pub access: AtomicUsize,
    pub signed_token: AtomicUsize,
    pub start: AtomicUsize,
    pub activity: AtomicUsize,
    pub toolbox_url: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MockControlPlane {
    pub calls: Calls,
    pub runner_url: Mutex<Option<String>>,
    pub runners: Mutex<HashMap<String, RunnerDto>>,
    pub snapshot: Mutex<Option<SnapshotDto>>,
    pub organizations: Mutex<Vec<OrganizationDto>>,
    /// States returned by successive `get_sandbox_info` calls; the last one repeats.
    pub states: Mutex<VecDeque<SandboxState>>,
    pub wake_on_request: Mutex<WakeOnRequest>,
    pub info_fails: Mutex<bool>,
    pub public: Mutex<Answer>,
    pub auth_token: Mutex<Answer>,
    pub access: Mutex<Answer>,
    pub signed_tokens: Mutex<HashMap<String, String>>,
    pub signed_token_down: Mutex<bool>,
    pub start_fails: Mutex<bool>,
    pub activity_fails: Mutex<bool>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self {
            calls: Calls::default(),
            runner_url: Mutex::new(Some("http://runner-1:3003".to_string())),
            runners: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(None),
            organizations: Mutex::new(Vec::new()),
            states: Mutex::new(VecDeque::from([SandboxState::Started])),
            wake_on_request: Mutex::new(WakeOnRequest::None),
            info_fails: Mutex::new(false),
            public: Mutex::new(Answer::No),
            auth_token: Mutex::new(Answer::No),
            access: Mutex::new(Answer::No),
            signed_tokens: Mutex::new(HashMap::new()),
            signed_token_down: Mutex::new(false),
            start_fails: Mutex::new(false),
            activity_fails: Mutex::new(false),
        }
    }
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_states(self, states: &[SandboxState], policy: WakeOnRequest) -> Self {
        *self.states.lock().unwrap() = states.iter().copied().collect();
        *self.wake_on_request.lock().unwrap() = policy;
        self
    }

    fn unavailable() -> ControlPlaneError {
        ControlPlaneError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    fn not_found() -> ControlPlaneError {
        ControlPlaneError::Status {
            status: 404,
            message: "not found".to_string(),
        }
    }

    fn answer(endpoint: &Mutex<Answer>, counter: &AtomicUsize) -> Result<(), ControlPlaneError> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        match *endpoint.lock().unwrap() {
            Answer::Yes => Ok(()),
            Answer::No => Err(ControlPlaneError::Status {
                status: 403,
                message: "forbidden".to_string(),
            }),
            Answer::FlakyThenYes(failures) if n < failures => Err(Self::unavailable()),
            Answer::FlakyThenYes(_) => Ok(()),
            Answer::Down => Err(Self::unavailable()),
        }
    }
}

impl ControlPlane for MockControlPlane {
    async fn get_runner_by_sandbox(&self, _sandbox_id: &str) -> Result<RunnerDto, ControlPlaneError> {
        self.calls.runner_by_sandbox.fetch_add(1, Ordering::SeqCst);
        Ok(RunnerDto {
            id: "runner-1".to_string(),
            proxy_url: self.runner_url.lock().unwrap().clone(),
            api_key: "runner-key".to_string(),
        })
    }

    async fn get_runner(&self, runner_id: &str) -> Result<RunnerDto, ControlPlaneError> {
        self.calls.runner.fetch_add(1, Ordering::SeqCst);
        self.runners
            .lock()
            .unwrap()
            .get(runner_id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn get_snapshot(&self, _snapshot_id: &str) -> Result<SnapshotDto, ControlPlaneError> {
        self.calls.snapshot.fetch_add(1, Ordering::SeqCst);
        self.snapshot.lock().unwrap().clone().ok_or_else(Self::not_found)
    }

    async fn list_organizations(
        &self,
        _bearer_token: &str,
    ) -> Result<Vec<OrganizationDto>, ControlPlaneError> {
        self.calls.organizations.fetch_add(1, Ordering::SeqCst);
        Ok(self.organizations.lock().unwrap().clone())
    }

    async fn get_sandbox_info(&self, _sandbox_id: &str) -> Result<SandboxInfoDto, ControlPlaneError> {
        self.calls.info.fetch_add(1, Ordering::SeqCst);
        if *self.info_fails.lock().unwrap() {
            return Err(Self::unavailable());
        }
        let mut states = self.states.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front().unwrap_or(SandboxState::Unknown)
        } else {
            states.front().copied().unwrap_or(SandboxState::Unknown)
        };
        Ok(SandboxInfoDto {
            state,
            wake_on_request: *self.wake_on_request.lock().unwrap(),
        })
    }

    async fn is_sandbox_public(&self, _sandbox_id: &str) -> Result<(), ControlPlaneError> {
        Self::answer(&self.public, &self.calls.public)
    }

    async fn is_valid_auth_token(
        &self,
        _sandbox_id: &str,
        _auth_token: &str,
    ) -> Result<(), ControlPlaneError> {
        Self::answer(&self.auth_token, &self.calls.auth_token)
    }

    async fn has_sandbox_access(
        &self,
        _sandbox_id: &str,
        _bearer_token: &str,
    ) -> Result<(), ControlPlaneError> {
        Self::answer(&self.access, &self.calls.access)
    }

    async fn sandbox_id_from_signed_token(
        &self,
        token: &str,
        _port: u16,
    ) -> Result<String, ControlPlaneError> {
        self.calls.signed_token.fetch_add(1, Ordering::SeqCst);
        if *self.signed_token_down.lock().unwrap() {
            return Err(Self::unavailable());
        }
        self.signed_tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn start_sandbox(&self, _sandbox_id: &str) -> Result<(), ControlPlaneError> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        if *self.start_fails.lock().unwrap() {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn update_last_activity(&self, _sandbox_id: &str) -> Result<(), ControlPlaneError> {
        self.calls.activity.fetch_add(1, Ordering::SeqCst);
        if *self.activity_fails.lock().unwrap() {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn get_toolbox_proxy_url(&self, sandbox_id: &str) -> Result<String, ControlPlaneError> {
        self.calls.toolbox_url.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://proxy.example.com/toolbox/{sandbox_id}"))
    }
}

pub fn memory_store() -> BoxCacheStore {
    BoxCacheStore::new(MemoryCacheStore::new())
}

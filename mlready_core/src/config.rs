use std::path::PathBuf;
use std::time::Duration;

/// Transfer tuning for [`ArtifactFetcher`](crate::ArtifactFetcher).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Fail the attempt when no body bytes arrive for this long.
    pub stall_timeout: Duration,
    /// Upper bound on one attempt, request through rename.
    pub total_timeout: Duration,
    pub connect_timeout: Duration,
    /// Attempts per `ensure` call, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after every failure.
    pub retry_base_delay: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(60 * 60),
            connect_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            user_agent: concat!("mlready/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(6))
    }
}

/// A Python module the workstation must be able to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCheck {
    /// Import name, e.g. `PIL`.
    pub module: String,
    /// Distribution name shown to the user, e.g. `Pillow`.
    pub display_name: String,
    /// Statement run after the import; failure marks the library degraded.
    pub smoke_test: Option<String>,
}

impl LibraryCheck {
    pub fn new(module: impl Into<String>) -> Self {
        let module = module.into();
        Self {
            display_name: module.clone(),
            module,
            smoke_test: None,
        }
    }

    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_smoke_test(mut self, statement: impl Into<String>) -> Self {
        self.smoke_test = Some(statement.into());
        self
    }
}

/// Where to look for an already provisioned artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCheck {
    pub name: String,
    /// Checked in order; the first plausible file wins.
    pub candidates: Vec<PathBuf>,
    pub minimum_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub python: String,
    pub libraries: Vec<LibraryCheck>,
    /// Program and arguments that print one line per accelerator.
    pub accelerator_command: Vec<String>,
    pub command_timeout: Duration,
    pub artifact: Option<ArtifactCheck>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            libraries: default_libraries(),
            accelerator_command: vec![
                "nvidia-smi".to_string(),
                "--query-gpu=name".to_string(),
                "--format=csv,noheader".to_string(),
            ],
            command_timeout: Duration::from_secs(60),
            artifact: None,
        }
    }
}

/// The navigation agent's Python stack.
pub fn default_libraries() -> Vec<LibraryCheck> {
    vec![
        LibraryCheck::new("torch").named("PyTorch"),
        LibraryCheck::new("clip")
            .named("CLIP")
            .with_smoke_test("clip.load('RN50', device='cpu')"),
        LibraryCheck::new("ai2thor").named("AI2-THOR"),
        LibraryCheck::new("fastapi").named("FastAPI"),
        LibraryCheck::new("uvicorn"),
        LibraryCheck::new("numpy"),
        LibraryCheck::new("PIL").named("Pillow"),
        LibraryCheck::new("tqdm"),
        LibraryCheck::new("websockets"),
    ]
}

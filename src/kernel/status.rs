use core::fmt;

/// Kernel initialization status tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed(&'static str),
}

/// Setup phases, in boot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    Paging,
    InterruptTable,
    InterruptController,
}

impl BootPhase {
    pub const ALL: [BootPhase; 3] = [
        BootPhase::Paging,
        BootPhase::InterruptTable,
        BootPhase::InterruptController,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BootPhase::Paging => "Paging",
            BootPhase::InterruptTable => "Interrupt Descriptor Table",
            BootPhase::InterruptController => "Interrupt Controller",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Kernel component status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStatus {
    pub phase: BootPhase,
    pub status: InitStatus,
}

impl ComponentStatus {
    pub fn new(phase: BootPhase) -> Self {
        Self {
            phase,
            status: InitStatus::NotStarted,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, InitStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, InitStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootStatus {
    components: [ComponentStatus; 3],
}

impl BootStatus {
    pub fn new() -> Self {
        Self {
            components: BootPhase::ALL.map(ComponentStatus::new),
        }
    }

    pub fn update(&mut self, phase: BootPhase, status: InitStatus) {
        self.components[phase.index()].status = status;
    }

    pub fn get(&self, phase: BootPhase) -> InitStatus {
        self.components[phase.index()].status
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentStatus> {
        self.components.iter()
    }

    /// Check if all components are initialized
    pub fn all_ready(&self) -> bool {
        self.components.iter().all(|c| c.is_complete())
    }
}

impl Default for BootStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStatus::NotStarted => write!(f, "Not Started"),
            InitStatus::InProgress => write!(f, "In Progress"),
            InitStatus::Completed => write!(f, "Completed"),
            InitStatus::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

pub mod auth;
pub mod classifier;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;
pub mod session;
pub mod vendor;
pub mod workflow;

pub use domain::{
    BatchReport, Credentials, JobStatus, MinuteOfDay, ReservationOperation, ReservationRecord,
    ReservationRequest, ReservationResult, ResultStatus, SessionState, ShiftRange, SlotInfo,
};
pub use error::{ErrorCode, RpaError, RpaResult};
pub use ports::{PortError, PortResult, RemoteUi, UiLauncher};
pub use service::{Failure, Outcome, SchedulingService, ServiceResult};
pub use session::{SessionConfig, SessionEvent, SessionManager, SessionStatus, Timed, Timing};
pub use workflow::{EngineConfig, ScheduleEngine};

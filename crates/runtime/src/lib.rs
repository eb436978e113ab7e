pub mod eta;
pub mod heartbeat;
pub mod job;
pub mod notify;
pub mod progress;

pub use eta::*;
pub use heartbeat::*;
pub use job::*;
pub use notify::*;
pub use progress::*;

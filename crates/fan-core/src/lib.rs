pub mod cache;
pub mod definition;
pub mod error;
pub mod fan;
pub mod monitor;
pub mod sensor;
pub mod status;
pub mod system;
pub mod timebase;
pub mod timer;
pub mod trust;

pub use cache::PropertyCache;
pub use definition::{FanDefinition, Method, SensorDefinition};
pub use error::{DefinitionError, NotifyError, ReadError};
pub use fan::{Fan, FanTimer};
pub use monitor::Monitor;
pub use sensor::{TachSensor, TimerMode};
pub use status::{FanStatus, SensorStatus};
pub use system::{Context, Coordinator, Inventory, PropertySource};
pub use timebase::TimeBase;
pub use timer::{RepeatingTimer, Timer};
pub use trust::{NoTrust, StaticTrust, TrustEvaluator};

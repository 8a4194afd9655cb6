//! KuCoin Market Data Adapter
//!
//! Public market data from KuCoin over two delivery modes:
//!
//! - **Push**: one persistent stream per attempt, see [`bootstrap`],
//!   [`heartbeat`], [`guardian`], [`subscriber`] and [`reader`]
//! - **Pull**: one [`poller`] per subscription against the REST API
//!
//! Wire shapes live in [`messages`] and [`codec`]; [`normalizer`] turns
//! them into domain records. [`attempt`] wires everything together.

pub mod attempt;
pub mod bootstrap;
pub mod codec;
pub mod guardian;
pub mod heartbeat;
pub mod messages;
pub mod normalizer;
pub mod poller;
pub mod reader;
pub mod subscriber;

pub use attempt::{EXCHANGE_NAME, KucoinPipeline, PipelineDeps, PipelineSettings, run};
pub use bootstrap::{Bootstrapper, Session};
pub use codec::{CodecError, Inbound};
pub use heartbeat::KeepAlive;
pub use poller::RestPoller;
pub use reader::{FrameOutcome, StreamReader};
pub use subscriber::{SubscribeRateLimit, SubscribeReport, Subscriber};

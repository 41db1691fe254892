//! Beacon SDK - the context object of the telemetry durability layer
//!
//! [`Beacon`] owns one store, its write serializer, the log and span
//! pipelines, the session controller and the startup reconciler. There are
//! no global singletons: the host creates a `Beacon`, starts it, hands the
//! exporters to its instrumentation and stops it on exit.
//!
//! ```no_run
//! # async fn demo() -> Result<(), beacon_sdk::SdkError> {
//! use beacon_sdk::{Beacon, BeaconOptions};
//!
//! let options = BeaconOptions::from_default_config();
//! beacon_sdk::logging::init(&options.config.logging)?;
//!
//! let beacon = Beacon::new(options).await?;
//! beacon.start();
//! // ... instrumentation exports through beacon.log_exporter() ...
//! beacon.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod beacon;
pub mod error;
pub mod logging;
pub mod observer;
pub mod options;

pub use beacon::Beacon;
pub use error::SdkError;
pub use observer::CrashSessionObserver;
pub use options::BeaconOptions;

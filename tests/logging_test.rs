//! Subscriber installation runs in its own test binary: the global dispatcher can
//! only be set once per process.

use galil_sequencer::config::MotionConfig;
use galil_sequencer::logging::{self, OutputFormat, TracingConfig};

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig {
        ansi: false,
        ..Default::default()
    };
    assert!(logging::init(config.clone().with_format(OutputFormat::Compact)).is_ok());
    assert!(tracing::dispatcher::has_been_set());
    assert!(logging::init(config).is_ok());
    assert!(logging::init_from_config(&MotionConfig::default()).is_ok());
}

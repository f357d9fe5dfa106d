use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise debug builds log this crate at debug level
/// and everything else at info. Calling it again is a no-op, and so is calling it
/// when the host application already installed a subscriber.
pub fn init() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                EnvFilter::new("chat_sync=debug,info")
            } else {
                EnvFilter::new("info")
            }
        });

        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

pub fn fmt_ms(d: std::time::Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        "<1ms".into()
    } else {
        format!("{}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fmt_ms() {
        assert_eq!(fmt_ms(Duration::from_micros(200)), "<1ms");
        assert_eq!(fmt_ms(Duration::from_millis(1_250)), "1250ms");
    }

    #[test]
    fn test_init_twice() {
        init();
        init();
    }
}

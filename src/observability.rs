//! tracing サブスクライバの初期化。
use anyhow::{Error, Result};
use once_cell::sync::OnceCell;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

const LOG_FILTER: &str = "EMAIL_DISCRIMINATOR_LOG";
const LOG_FORMAT: &str = "EMAIL_DISCRIMINATOR_LOG_FORMAT";

/// Tracing サブスクライバを一度だけ初期化する。
///
/// フィルタは `EMAIL_DISCRIMINATOR_LOG`、次に `RUST_LOG`、どちらも無ければ `info`。
/// `EMAIL_DISCRIMINATOR_LOG_FORMAT=json` なら JSON で出力する。出力先は標準エラー。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init() -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_from_env(LOG_FILTER)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var(LOG_FORMAT).is_ok_and(|format| format.eq_ignore_ascii_case("json"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer.json())
                .try_init()
                .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;
        }
        debug!(json, "tracing initialized");
        Ok::<(), Error>(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init().expect("first init");
        init().expect("second init is a no-op");
    }
}

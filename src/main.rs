use std::process::ExitCode;

fn main() -> ExitCode {
    // .env may carry SENTRY_DSN; load it before Sentry reads the environment.
    let _ = dotenvy::dotenv();

    // Initialize Sentry before anything else so panics during startup are captured.
    // Returns a no-op guard when SENTRY_DSN is absent (local dev).
    let _sentry_guard = sentry::init(sentry_options());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(telemetry_lib::run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "dashboard-telemetry exited with an error");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn sentry_options() -> sentry::ClientOptions {
    sentry::ClientOptions {
        dsn: std::env::var("SENTRY_DSN").ok().and_then(|s| s.parse().ok()),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        traces_sample_rate: 0.0,
        send_default_pii: false,
        auto_session_tracking: true,
        session_mode: sentry::SessionMode::Request,
        before_send: Some(std::sync::Arc::new(|mut event| {
            if let Some(ref mut user) = event.user {
                user.email = None;
                user.ip_address = None;
                user.username = None;
            }
            // Action payloads carry actor names.
            if let Some(ref mut request) = event.request {
                request.data = None;
                request
                    .headers
                    .retain(|name, _| !name.eq_ignore_ascii_case("authorization"));
            }
            Some(event)
        })),
        ..Default::default()
    }
}

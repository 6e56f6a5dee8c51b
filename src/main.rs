use enrich_worker::RUNTIME_SHUTDOWN_GRACE;

fn main() -> eyre::Result<()> {
    let _log_guard = enrich_worker::init_tracing()?;

    let result = enrich_worker::execute(enrich_worker::run().start(), RUNTIME_SHUTDOWN_GRACE)?;

    if let Err(e) = result {
        tracing::error!(error = %e, "worker failed");
        return Err(e);
    }

    Ok(())
}

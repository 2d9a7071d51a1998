use std::time::Instant;
use surf::middleware::{Middleware, Next};
use surf::{Client, Request, Response, Result};

/// Logs every outgoing request and the status (or failure) it settled with.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurfLogging;

#[surf::utils::async_trait]
impl Middleware for SurfLogging {
    async fn handle(&self, req: Request, client: Client, next: Next<'_>) -> Result<Response> {
        let method = req.method();
        let url = req.url().to_string();
        let started = Instant::now();
        log::debug!("--> {} {}", method, url);

        let result = next.run(req, client).await;
        match &result {
            Ok(response) => log::debug!(
                "<-- {} {} {} ({:?})",
                method,
                url,
                response.status(),
                started.elapsed()
            ),
            Err(err) => log::debug!(
                "<-- {} {} failed: {} ({:?})",
                method,
                url,
                err,
                started.elapsed()
            ),
        }
        result
    }
}

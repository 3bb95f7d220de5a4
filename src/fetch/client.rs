use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes a prepared HTTP request. Implementations may decorate the
/// request (auth headers, query keys) before sending it.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

// Lets the binary pick a decorated client at runtime.
#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Box<C> {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        (**self).execute(req).await
    }
}

use arc_swap::ArcSwap;
use sidecar_prometheus::debug::DEBUG;
use std::sync::Arc;
use tide::http::headers::CONTENT_TYPE;
use tide::{Request, Response, Server, StatusCode};

/// The content type of the text exposition format
const EXPOSITION_FORMAT: &str = "text/plain; version=0.0.4";

/// The most recently published metrics text.
///
/// The poll loop replaces it once per tick; readers get whichever complete
/// text was current when their request arrived.
#[derive(Debug, Default)]
pub struct Published {
    text: ArcSwap<String>,
}

impl Published {
    pub fn new() -> Self {
        Published::default()
    }

    pub fn store(&self, text: String) {
        self.text.store(Arc::new(text));
        DEBUG.published();
    }

    pub fn load(&self) -> Arc<String> {
        self.text.load_full()
    }
}

/// Builds the http server which serves the published text on `path`
pub fn app(published: Arc<Published>, path: &str) -> Server<Arc<Published>> {
    let mut app = tide::with_state(published);
    app.at(path).get(serve);
    app
}

async fn serve(req: Request<Arc<Published>>) -> tide::Result {
    let text = req.state().load();
    Ok(Response::builder(StatusCode::Ok)
        .body(text.as_str())
        .header(CONTENT_TYPE, EXPOSITION_FORMAT)
        .build())
}

use crate::loader::{decode_raster, ImageSource, RasterHandle};
use futures_util::future::{FutureExt, LocalBoxFuture};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSourceOptions {
    pub endpoint: String,
    pub subfolder: String,
    pub kind: String,
}

impl Default for HttpSourceOptions {
    fn default() -> Self {
        Self {
            endpoint: "/view".to_string(),
            subfolder: String::new(),
            kind: "input".to_string(),
        }
    }
}

/// Fetches images from the host's view endpoint.
pub struct HttpImageSource {
    client: reqwest::Client,
    base: String,
    options: HttpSourceOptions,
    counter: Cell<u64>,
}

impl HttpImageSource {
    pub fn new(base: &str, options: HttpSourceOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            options,
            counter: Cell::new(0),
        }
    }

    fn cache_buster(&self) -> String {
        let count = self.counter.get();
        self.counter.set(count + 1);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{}{}", millis, count)
    }
}

impl ImageSource for HttpImageSource {
    fn url(&self, path: &str) -> String {
        let endpoint = format!("{}/{}", self.base, self.options.endpoint.trim_start_matches('/'));
        let rand = self.cache_buster();
        let parsed = Url::parse_with_params(
            &endpoint,
            &[
                ("filename", path),
                ("subfolder", self.options.subfolder.as_str()),
                ("type", self.options.kind.as_str()),
                ("rand", rand.as_str()),
            ],
        );
        match parsed {
            Ok(url) => url.to_string(),
            Err(_) => endpoint,
        }
    }

    fn load(&self, url: &str) -> LocalBoxFuture<'static, anyhow::Result<RasterHandle>> {
        let client = self.client.clone();
        let url = url.to_string();
        async move {
            let rsp = client.get(&url).send().await?.error_for_status()?;
            let body = rsp.bytes().await?;
            decode_raster(&body)
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use crate::loader::http_loader::{HttpImageSource, HttpSourceOptions};
    use crate::loader::ImageSource;

    #[test]
    fn test_view_url() {
        let source = HttpImageSource::new("http://127.0.0.1:8188/", HttpSourceOptions::default());
        let first = source.url("my image.png");
        let second = source.url("my image.png");
        assert!(first.starts_with("http://127.0.0.1:8188/view?filename=my+image.png&subfolder=&type=input&rand="));
        assert_ne!(first, second);
    }
}

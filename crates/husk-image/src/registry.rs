//! Docker registry v1 client.
//!
//! Four calls are needed to fetch an image:
//!
//! - token: `GET {index}/v1/repositories/{repo}/images` with
//!   `X-Docker-Token: true`; the token comes back in the response header of
//!   the same name.
//! - tag: `GET {registry}/v1/repositories/{repo}/tags/{tag}`, a quoted ID.
//! - ancestry: `GET {registry}/v1/images/{id}/ancestry`, a JSON array, leaf
//!   first.
//! - layer: `GET {registry}/v1/images/{id}/layer`, the archive bytes.
//!
//! Everything after the token request sends `Authorization: Token <token>`.

use std::io::{Read, Write};
use std::path::Path;

use husk_common::config::{RegistryConfig, RuntimeConfig};
use husk_common::constants;
use husk_common::error::{HuskError, Result};
use husk_common::types::{ContentId, ImageReference};
use reqwest::blocking::{Client, Response};

const TOKEN_HEADER: &str = "X-Docker-Token";

/// Source of image metadata and layer archives.
pub trait Registry {
    /// Obtains a repository token for `image`.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Registry` if the index refuses or omits the token.
    fn token(&self, image: &ImageReference) -> Result<String>;

    /// Resolves the image's tag to a content ID.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Registry` on HTTP failure or an unusable ID.
    fn resolve_tag(&self, token: &str, image: &ImageReference) -> Result<ContentId>;

    /// Fetches the layer chain of an image, leaf first.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Registry` on HTTP failure or malformed JSON.
    fn ancestry(&self, token: &str, id: &ContentId) -> Result<Vec<ContentId>>;

    /// Streams a layer archive into `dest`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Registry` on HTTP failure and `HuskError::Io` if
    /// `dest` cannot be written.
    fn fetch_layer(&self, token: &str, id: &ContentId, dest: &Path) -> Result<u64>;
}

impl<R: Registry + ?Sized> Registry for &R {
    fn token(&self, image: &ImageReference) -> Result<String> {
        (**self).token(image)
    }

    fn resolve_tag(&self, token: &str, image: &ImageReference) -> Result<ContentId> {
        (**self).resolve_tag(token, image)
    }

    fn ancestry(&self, token: &str, id: &ContentId) -> Result<Vec<ContentId>> {
        (**self).ancestry(token, id)
    }

    fn fetch_layer(&self, token: &str, id: &ContentId, dest: &Path) -> Result<u64> {
        (**self).fetch_layer(token, id, dest)
    }
}

/// Registry client over blocking HTTP.
///
/// The client owns a background thread; drop it before forking or
/// unsharing a user namespace.
#[derive(Debug)]
pub struct HttpRegistry {
    client: Client,
    config: RegistryConfig,
    chunk_size: usize,
}

impl HttpRegistry {
    /// Builds a client for the registry named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Registry` if the HTTP client cannot be created.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!(
                "{}/{}",
                constants::APP_NAME,
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| HuskError::Registry {
                url: config.registry.index_url.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config: config.registry.clone(),
            chunk_size: config.chunk_size.max(1),
        })
    }

    fn token_url(&self, image: &ImageReference) -> String {
        format!(
            "{}/v1/repositories/{}/images",
            self.config.index_url.trim_end_matches('/'),
            image.repository()
        )
    }

    fn tag_url(&self, image: &ImageReference) -> String {
        format!(
            "{}/v1/repositories/{}/tags/{}",
            self.config.registry_url.trim_end_matches('/'),
            image.repository(),
            image.tag()
        )
    }

    fn image_url(&self, id: &ContentId, resource: &str) -> String {
        format!(
            "{}/v1/images/{id}/{resource}",
            self.config.registry_url.trim_end_matches('/'),
        )
    }

    fn get(&self, url: &str, token: &str) -> Result<Response> {
        tracing::debug!(url, "registry request");
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Token {token}"))
            .send()
            .map_err(|e| registry_error(url, format!("request failed: {e}")))?;
        check_status(url, response)
    }
}

impl Registry for HttpRegistry {
    fn token(&self, image: &ImageReference) -> Result<String> {
        let url = self.token_url(image);
        tracing::debug!(url = %url, "requesting repository token");
        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, "true")
            .send()
            .map_err(|e| registry_error(&url, format!("request failed: {e}")))?;
        let response = check_status(&url, response)?;
        response
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| registry_error(&url, format!("response has no {TOKEN_HEADER} header")))
    }

    fn resolve_tag(&self, token: &str, image: &ImageReference) -> Result<ContentId> {
        let url = self.tag_url(image);
        let body = self
            .get(&url, token)?
            .text()
            .map_err(|e| registry_error(&url, format!("failed to read body: {e}")))?;
        ContentId::from_quoted(&body)
            .map_err(|e| registry_error(&url, format!("unusable image id: {e}")))
    }

    fn ancestry(&self, token: &str, id: &ContentId) -> Result<Vec<ContentId>> {
        let url = self.image_url(id, "ancestry");
        let body = self
            .get(&url, token)?
            .text()
            .map_err(|e| registry_error(&url, format!("failed to read body: {e}")))?;
        let raw: Vec<String> = serde_json::from_str(&body)
            .map_err(|e| registry_error(&url, format!("malformed ancestry: {e}")))?;
        raw.into_iter()
            .map(|layer| {
                ContentId::new(layer)
                    .map_err(|e| registry_error(&url, format!("malformed ancestry: {e}")))
            })
            .collect()
    }

    fn fetch_layer(&self, token: &str, id: &ContentId, dest: &Path) -> Result<u64> {
        let url = self.image_url(id, "layer");
        let mut response = self.get(&url, token)?;
        let mut file = std::fs::File::create(dest).map_err(|e| HuskError::io(dest, e))?;
        let mut buf = vec![0_u8; self.chunk_size];
        let mut total: u64 = 0;
        loop {
            let n = response
                .read(&mut buf)
                .map_err(|e| registry_error(&url, format!("download interrupted: {e}")))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .map_err(|e| HuskError::io(dest, e))?;
            total += n as u64;
        }
        file.sync_all().map_err(|e| HuskError::io(dest, e))?;
        tracing::debug!(url = %url, bytes = total, "layer downloaded");
        Ok(total)
    }
}

fn registry_error(url: &str, message: String) -> HuskError {
    HuskError::Registry {
        url: url.to_owned(),
        message,
    }
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(registry_error(url, format!("HTTP {status}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use super::*;

    /// Serves one canned HTTP response and hands back the raw request head.
    fn serve_once(status: &str, headers: &[(&str, &str)], body: &[u8]) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let mut response = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str("\r\n");
        let mut response = response.into_bytes();
        response.extend_from_slice(body);

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = std::io::BufReader::new(stream.try_clone().expect("clone"));
            let mut head = String::new();
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).expect("read request");
                if n == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            stream.write_all(&response).expect("write response");
            head
        });
        (format!("http://{addr}"), handle)
    }

    fn registry_at(url: &str) -> HttpRegistry {
        let mut config = RuntimeConfig::default();
        config.registry.index_url = url.to_owned();
        config.registry.registry_url = format!("{url}/");
        config.chunk_size = 4;
        HttpRegistry::new(&config).expect("client")
    }

    fn image(reference: &str) -> ImageReference {
        ImageReference::parse(reference).expect("reference")
    }

    #[test]
    fn urls_follow_v1_layout() {
        let registry = registry_at("http://registry.test");
        let id = ContentId::new("abc").expect("id");
        assert_eq!(
            registry.token_url(&image("busybox")),
            "http://registry.test/v1/repositories/library/busybox/images"
        );
        assert_eq!(
            registry.tag_url(&image("someone/app:1.0")),
            "http://registry.test/v1/repositories/someone/app/tags/1.0"
        );
        assert_eq!(
            registry.image_url(&id, "ancestry"),
            "http://registry.test/v1/images/abc/ancestry"
        );
    }

    #[test]
    fn token_is_read_from_response_header() {
        let (url, server) = serve_once("200 OK", &[(TOKEN_HEADER, "signature=abc")], b"[]");
        let token = registry_at(&url).token(&image("busybox")).expect("token");
        assert_eq!(token, "signature=abc");

        let request = server.join().expect("server").to_ascii_lowercase();
        assert!(request.starts_with("get /v1/repositories/library/busybox/images"));
        assert!(request.contains("x-docker-token: true"));
    }

    #[test]
    fn missing_token_header_is_registry_error() {
        let (url, server) = serve_once("200 OK", &[], b"[]");
        let err = registry_at(&url).token(&image("busybox")).unwrap_err();
        let _ = server.join();
        assert!(matches!(err, HuskError::Registry { .. }));
    }

    #[test]
    fn tag_lookup_strips_quotes_and_sends_token() {
        let (url, server) = serve_once("200 OK", &[], b"\"deadbeef\"\n");
        let id = registry_at(&url)
            .resolve_tag("signature=abc", &image("busybox:1.36"))
            .expect("tag");
        assert_eq!(id.as_str(), "deadbeef");

        let request = server.join().expect("server").to_ascii_lowercase();
        assert!(request.starts_with("get /v1/repositories/library/busybox/tags/1.36"));
        assert!(request.contains("authorization: token signature=abc"));
    }

    #[test]
    fn malformed_ancestry_is_registry_error_with_url() {
        let (url, server) = serve_once("200 OK", &[], b"{\"not\": \"a list\"}");
        let id = ContentId::new("leaf").expect("id");
        let err = registry_at(&url).ancestry("t", &id).unwrap_err();
        let _ = server.join();
        match err {
            HuskError::Registry { url, message } => {
                assert!(url.ends_with("/v1/images/leaf/ancestry"));
                assert!(message.contains("malformed ancestry"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ancestry_preserves_leaf_first_order() {
        let (url, server) = serve_once("200 OK", &[], b"[\"l3\", \"l2\", \"l1\"]");
        let id = ContentId::new("l3").expect("id");
        let chain = registry_at(&url).ancestry("t", &id).expect("ancestry");
        let _ = server.join();
        let names: Vec<&str> = chain.iter().map(ContentId::as_str).collect();
        assert_eq!(names, ["l3", "l2", "l1"]);
    }

    #[test]
    fn layer_is_streamed_to_destination() {
        let payload = b"layer archive bytes spanning several chunks";
        let (url, server) = serve_once("200 OK", &[], payload);
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("l1.tar.partial");
        let id = ContentId::new("l1").expect("id");

        let written = registry_at(&url).fetch_layer("t", &id, &dest).expect("fetch");
        let _ = server.join();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&dest).expect("read"), payload);
    }

    #[test]
    fn http_error_status_is_registry_error() {
        let (url, server) = serve_once("404 Not Found", &[], b"");
        let err = registry_at(&url)
            .resolve_tag("t", &image("missing"))
            .unwrap_err();
        let _ = server.join();
        assert!(err.to_string().contains("404"));
    }
}

use serde::Serialize;

/// A buffered response sink.
///
/// Handlers write a head and a body; the transport collaborator drains the
/// buffer once the chain completes. After `end` (or after the transport
/// aborts the connection) every further write is a no-op, so in-flight
/// handler continuations can keep running without crashing.
pub struct Response {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    finished: bool,
    aborted: bool,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body: Vec::new(),
            finished: false,
            aborted: false,
        }
    }

    /// Status code written so far; 200 when the chain never set one.
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Sets the status code and headers for this response.
    pub fn write_head<K, V>(
        &mut self,
        status: u16,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        if self.closed() {
            return self;
        }
        self.status = Some(status);
        for (name, value) in headers {
            self.set_header(name.into(), value.into());
        }
        self
    }

    pub fn set_status(&mut self, status: u16) -> &mut Self {
        if !self.closed() {
            self.status = Some(status);
        }
        self
    }

    /// Sets a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        if self.closed() {
            return self;
        }
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Finishes the response with the given body. Adds a `Date` header when
    /// the chain did not set one.
    pub fn end(&mut self, body: impl AsRef<[u8]>) {
        if self.closed() {
            return;
        }
        if self.header("Date").is_none() {
            let date = chrono::Utc::now()
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string();
            self.set_header("Date", date);
        }
        self.body.extend_from_slice(body.as_ref());
        self.finished = true;
    }

    /// Ends the response with a plain text body.
    pub fn text(&mut self, body: &str) {
        self.write_head(
            200,
            [
                ("Content-Type", "text/plain; charset=utf-8".to_string()),
                ("Content-Length", body.len().to_string()),
            ],
        );
        self.end(body.as_bytes());
    }

    /// Ends the response with a JSON body.
    pub fn json<T: Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        let body = serde_json::to_string(value)?;
        self.write_head(
            200,
            [
                ("Content-Type", "application/json; charset=utf-8".to_string()),
                ("Content-Length", body.len().to_string()),
            ],
        );
        self.end(body.as_bytes());
        Ok(())
    }

    /// Ends the response with a URL-encoded body.
    pub fn url_encoded<'p>(&mut self, pairs: impl IntoIterator<Item = (&'p str, &'p str)>) {
        let body = pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.write_head(
            200,
            [
                (
                    "Content-Type",
                    "application/x-www-form-urlencoded; charset=utf-8".to_string(),
                ),
                ("Content-Length", body.len().to_string()),
            ],
        );
        self.end(body.as_bytes());
    }

    /// Transport signal: the connection is gone. Every later write becomes a
    /// no-op.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// True once the response has been ended or aborted; writes after this
    /// point are dropped.
    pub fn closed(&self) -> bool {
        self.finished || self.aborted
    }

    /// Drains the buffered response for the transport layer.
    pub fn into_parts(self) -> (u16, Vec<(String, String)>, Vec<u8>) {
        (self.status.unwrap_or(200), self.headers, self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::HashMap;

use crate::mime;

/// An inbound message as seen by the filter pipeline.
///
/// Headers are stored with lowercased names; the body is kept as the raw
/// undecoded payload. `peer_address` lists the delivery path client-first,
/// so `peer_address[0]` is the host that handed us the message.
#[derive(Debug, Default, Clone)]
pub struct Message {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub peer_address: Vec<String>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    /// The Subject header with RFC 2047 encoded words decoded, or an
    /// empty string when the header is absent.
    pub fn decoded_subject(&self) -> String {
        self.header("subject").map(mime::decode_header).unwrap_or_default()
    }

    /// The body decoded according to the Content-Transfer-Encoding
    /// header. A missing header means identity.
    pub fn decoded_body(&self) -> String {
        let encoding = self.header("content-transfer-encoding").unwrap_or("");
        mime::decode_transfer(&self.body, encoding)
    }
}

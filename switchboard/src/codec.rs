//! Payload encodings and content negotiation.
//!
//! A `Codec` is a plain value identified by its content type. Picking one is a lookup in
//! the headers with a short fallback chain; there is nothing to implement or register.

use bytes::Bytes;

use crate::{headers, Headers};

/// Failure to encode or decode a payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// MessagePack encoding failed
    #[error("MessagePack encode failure: {0}")]
    MessagePackEncode(#[from] rmp_serde::encode::Error),
    /// MessagePack decoding failed
    #[error("MessagePack decode failure: {0}")]
    MessagePackDecode(#[from] rmp_serde::decode::Error),
    /// JSON encoding or decoding failed
    #[error("JSON failure: {0}")]
    Json(#[from] serde_json::Error),
    /// Nothing in the payload, and the target type needs something
    #[error("Empty payload: {0}")]
    Empty(serde::de::value::Error),
    /// The content type names no known codec
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// A marshal/unmarshal pair for one content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// `application/msgpack`. Structs are encoded as maps with field names, so a payload
    /// has the same shape it would have as JSON.
    MessagePack,
    /// `application/json`
    Json,
}

impl Default for Codec {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Codec {
    /// The codec used when nobody asked for anything.
    pub const DEFAULT: Codec = Codec::MessagePack;

    /// Every codec, in order of preference.
    pub const ALL: [Codec; 2] = [Codec::MessagePack, Codec::Json];

    /// The canonical content type of this codec.
    pub fn content_type(&self) -> &'static str {
        match self {
            Codec::MessagePack => "application/msgpack",
            Codec::Json => "application/json",
        }
    }

    /// Look up a codec by content type. Media type parameters (`; charset=utf-8`) and
    /// case are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Codec> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            "application/msgpack" | "application/x-msgpack" | "application/vnd.msgpack" => {
                Some(Codec::MessagePack)
            }
            "application/json" => Some(Codec::Json),
            _ => None,
        }
    }

    /// Encode a value.
    pub fn marshal<T>(&self, value: &T) -> Result<Bytes, CodecError>
    where
        T: serde::Serialize + ?Sized,
    {
        let encoded = match self {
            Codec::MessagePack => rmp_serde::to_vec_named(value)?,
            Codec::Json => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(encoded))
    }

    /// Decode a value.
    ///
    /// An empty payload is read as the unit value, so `()` and `Option<_>` targets
    /// decode from nothing.
    pub fn unmarshal<T>(&self, payload: &[u8]) -> Result<T, CodecError>
    where
        T: serde::de::DeserializeOwned,
    {
        if payload.is_empty() {
            return T::deserialize(serde::de::value::UnitDeserializer::<
                serde::de::value::Error,
            >::new())
            .map_err(CodecError::Empty);
        }
        match self {
            Codec::MessagePack => Ok(rmp_serde::from_slice(payload)?),
            Codec::Json => Ok(serde_json::from_slice(payload)?),
        }
    }
}

/// The codec for decoding a request body, from its `Content-Type`.
///
/// A request without a content type uses the default codec. A request with a content
/// type nobody understands can not be decoded at all.
pub fn request_codec(headers: &Headers) -> Result<Codec, CodecError> {
    match headers.get(headers::CONTENT_TYPE) {
        Some(content_type) => Codec::from_content_type(content_type)
            .ok_or_else(|| CodecError::UnsupportedContentType(content_type.clone())),
        None => Ok(Codec::DEFAULT),
    }
}

/// The codec for encoding a response to a request with these headers.
///
/// The first supported entry of `Accept` wins; otherwise the request's own content type,
/// otherwise the default. This never fails: a response can always be encoded somehow.
pub fn response_codec(headers: &Headers) -> Codec {
    headers
        .get(headers::ACCEPT)
        .and_then(|accept| accept.split(',').find_map(Codec::from_content_type))
        .or_else(|| {
            headers
                .get(headers::CONTENT_TYPE)
                .and_then(|content_type| Codec::from_content_type(content_type))
        })
        .unwrap_or(Codec::DEFAULT)
}

#[cfg(test)]
mod test {
    use crate::{headers, Headers};

    use super::{request_codec, response_codec, Codec, CodecError};

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Pong {
        pong: String,
        count: u32,
        tags: Vec<String>,
        nested: Option<Box<Pong>>,
    }

    fn pong() -> Pong {
        Pong {
            pong: "hi".to_string(),
            count: 3,
            tags: vec!["a".to_string(), "".to_string()],
            nested: Some(Box::new(Pong {
                pong: "inner".to_string(),
                count: 0,
                tags: vec![],
                nested: None,
            })),
        }
    }

    #[test]
    fn round_trip() {
        for codec in Codec::ALL {
            let encoded = codec.marshal(&pong()).expect("encodable");
            assert_eq!(pong(), codec.unmarshal::<Pong>(&encoded).expect("decodable"));
        }
    }

    #[test]
    fn payloads_are_interchangeable_by_field_name() {
        // a JSON body decodes into the same struct a MessagePack body does
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Ping {
            ping: String,
        }
        let json = br#"{"ping":"json"}"#;
        let msgpack = Codec::MessagePack
            .marshal(&std::collections::HashMap::from([("ping", "json")]))
            .expect("encodable");
        assert_eq!(
            Codec::Json.unmarshal::<Ping>(json).expect("decodable"),
            Codec::MessagePack
                .unmarshal::<Ping>(&msgpack)
                .expect("decodable")
        );
    }

    #[test]
    fn empty_payload() {
        for codec in Codec::ALL {
            codec.unmarshal::<()>(&[]).expect("unit decodes from nothing");
            assert_eq!(
                None,
                codec.unmarshal::<Option<Pong>>(&[]).expect("option decodes")
            );
            assert!(matches!(
                codec.unmarshal::<Pong>(&[]),
                Err(CodecError::Empty(_))
            ));
        }
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(Codec::Json.unmarshal::<Pong>(b"{nope").is_err());
        assert!(Codec::MessagePack.unmarshal::<Pong>(&[0xc1]).is_err());
    }

    #[test]
    fn content_types() {
        for codec in Codec::ALL {
            assert_eq!(Some(codec), Codec::from_content_type(codec.content_type()));
        }
        assert_eq!(
            Some(Codec::Json),
            Codec::from_content_type("Application/JSON; charset=utf-8")
        );
        assert_eq!(
            Some(Codec::MessagePack),
            Codec::from_content_type("application/x-msgpack")
        );
        assert_eq!(None, Codec::from_content_type("text/plain"));
    }

    #[test]
    fn request_negotiation() {
        let mut headers = Headers::new();
        assert_eq!(Codec::DEFAULT, request_codec(&headers).expect("default"));

        headers.insert(headers::CONTENT_TYPE.to_string(), "application/json".to_string());
        assert_eq!(Codec::Json, request_codec(&headers).expect("json"));

        headers.insert(headers::CONTENT_TYPE.to_string(), "text/plain".to_string());
        assert!(matches!(
            request_codec(&headers),
            Err(CodecError::UnsupportedContentType(content_type)) if content_type == "text/plain"
        ));
    }

    #[test]
    fn response_negotiation_falls_back() {
        let mut headers = Headers::new();
        assert_eq!(Codec::DEFAULT, response_codec(&headers));

        headers.insert(headers::CONTENT_TYPE.to_string(), "application/json".to_string());
        assert_eq!(Codec::Json, response_codec(&headers), "request content type");

        headers.insert(headers::ACCEPT.to_string(), "text/html, application/msgpack;q=0.9".to_string());
        assert_eq!(Codec::MessagePack, response_codec(&headers), "first supported accept");

        headers.insert(headers::ACCEPT.to_string(), "*/*".to_string());
        assert_eq!(Codec::Json, response_codec(&headers), "unsupported accept");
    }
}

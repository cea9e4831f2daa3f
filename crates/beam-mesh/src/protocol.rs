use beam_core::{BeamError, EndpointId};
use bytes::{BufMut, Bytes, BytesMut};

/// Tag bytes prefixed to every negotiation payload on the mesh.
///
/// Fixed at build time; both peers must agree on them.
pub mod tags {
    pub const ENDPOINT_ID_EXCHANGE: u8 = 0x01;
    pub const SECOND_TRANSPORT_NAME_EXCHANGE: u8 = 0x02;
    pub const CLIENT_READY: u8 = 0x03;
}

/// Control messages exchanged over the mesh during negotiation.
///
/// Wire form: one tag byte followed by the UTF-8 payload. `ClientReady` has no
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationMessage {
    /// "This is my endpoint id": the input to role election.
    EndpointIdExchange(EndpointId),
    /// "This is the name I advertise on the radio."
    SecondTransportNameExchange(String),
    /// Sent by the client once it is scanning; tells the server to become
    /// discoverable.
    ClientReady,
}

impl NegotiationMessage {
    pub fn tag(&self) -> u8 {
        match self {
            NegotiationMessage::EndpointIdExchange(_) => tags::ENDPOINT_ID_EXCHANGE,
            NegotiationMessage::SecondTransportNameExchange(_) => {
                tags::SECOND_TRANSPORT_NAME_EXCHANGE
            }
            NegotiationMessage::ClientReady => tags::CLIENT_READY,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationMessage::EndpointIdExchange(_) => "endpoint_id_exchange",
            NegotiationMessage::SecondTransportNameExchange(_) => "second_transport_name_exchange",
            NegotiationMessage::ClientReady => "client_ready",
        }
    }

    pub fn encode(&self) -> Bytes {
        let payload: &[u8] = match self {
            NegotiationMessage::EndpointIdExchange(id) => id.as_str().as_bytes(),
            NegotiationMessage::SecondTransportNameExchange(name) => name.as_bytes(),
            NegotiationMessage::ClientReady => &[],
        };
        let mut buf = BytesMut::with_capacity(1 + payload.len());
        buf.put_u8(self.tag());
        buf.put_slice(payload);
        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> beam_core::Result<Self> {
        let (&tag, payload) = frame
            .split_first()
            .ok_or_else(|| BeamError::MalformedMessage("empty frame".into()))?;

        let text = || {
            std::str::from_utf8(payload)
                .map(str::to_owned)
                .map_err(|e| BeamError::MalformedMessage(format!("payload is not UTF-8: {e}")))
        };

        match tag {
            tags::ENDPOINT_ID_EXCHANGE => Ok(NegotiationMessage::EndpointIdExchange(
                EndpointId::new(text()?),
            )),
            tags::SECOND_TRANSPORT_NAME_EXCHANGE => {
                Ok(NegotiationMessage::SecondTransportNameExchange(text()?))
            }
            tags::CLIENT_READY if payload.is_empty() => Ok(NegotiationMessage::ClientReady),
            tags::CLIENT_READY => Err(BeamError::MalformedMessage(format!(
                "client_ready carries {} unexpected payload bytes",
                payload.len()
            ))),
            other => Err(BeamError::MalformedMessage(format!(
                "unknown tag 0x{other:02x}"
            ))),
        }
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use lva_ipc::Entity;

const MAX_PAYLOAD_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum HubProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid hub message type: {0}")]
    InvalidMessageType(u8),
    #[error("oversize hub frame: {0} bytes")]
    Oversize(u32),
    #[error("malformed hub message body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid base64 audio payload")]
    InvalidBase64,
}

/// One byte tag per message kind. The hub's own byte-level schema is out of
/// scope; this models only the channel this crate presents to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MessageType {
    Hello = 0x01,
    RegisterEntity = 0x02,
    EntityState = 0x03,
    EntityCommand = 0x10,
    Ping = 0x20,
    Pong = 0x21,
    VoiceAssistantStart = 0x30,
    VoiceAssistantAudioIn = 0x31,
    VoiceAssistantStop = 0x32,
    VoiceAssistantPhase = 0x33,
    VoiceAssistantAudioOut = 0x34,
}

impl TryFrom<u8> for MessageType {
    type Error = HubProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Hello),
            0x02 => Ok(MessageType::RegisterEntity),
            0x03 => Ok(MessageType::EntityState),
            0x10 => Ok(MessageType::EntityCommand),
            0x20 => Ok(MessageType::Ping),
            0x21 => Ok(MessageType::Pong),
            0x30 => Ok(MessageType::VoiceAssistantStart),
            0x31 => Ok(MessageType::VoiceAssistantAudioIn),
            0x32 => Ok(MessageType::VoiceAssistantStop),
            0x33 => Ok(MessageType::VoiceAssistantPhase),
            0x34 => Ok(MessageType::VoiceAssistantAudioOut),
            other => Err(HubProtocolError::InvalidMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HelloBody {
    node_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityCommandBody {
    key: String,
    value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VoiceAssistantStartBody {
    use_vad: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AudioBody {
    /// Raw 16-bit PCM, base64-encoded so it rides inside the same JSON body
    /// as every other message rather than needing a second framing for
    /// binary payloads.
    data_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VoiceAssistantPhaseBody {
    phase: String,
}

/// Typed messages exchanged with the hub over a single TCP connection.
/// The `VoiceAssistant*` variants carry the streaming voice-assistant RPC:
/// core starts a run, streams input audio chunks, and receives back phase
/// transitions (stt done / intent done / tts started) and output audio to
/// play (ADDED: the hub's own voice-assistant wire schema is out of scope,
/// this models the shape of the channel this crate presents to callers).
#[derive(Debug, Clone)]
pub enum HubMessage {
    Hello { node_name: String },
    RegisterEntity(Entity),
    EntityState(Entity),
    EntityCommand { key: String, value: serde_json::Value },
    Ping,
    Pong,
    VoiceAssistantStart { use_vad: bool },
    VoiceAssistantAudioIn { pcm: Vec<u8> },
    VoiceAssistantStop,
    VoiceAssistantPhase { phase: String },
    VoiceAssistantAudioOut { pcm: Vec<u8> },
}

impl HubMessage {
    fn message_type(&self) -> MessageType {
        match self {
            HubMessage::Hello { .. } => MessageType::Hello,
            HubMessage::RegisterEntity(_) => MessageType::RegisterEntity,
            HubMessage::EntityState(_) => MessageType::EntityState,
            HubMessage::EntityCommand { .. } => MessageType::EntityCommand,
            HubMessage::Ping => MessageType::Ping,
            HubMessage::Pong => MessageType::Pong,
            HubMessage::VoiceAssistantStart { .. } => MessageType::VoiceAssistantStart,
            HubMessage::VoiceAssistantAudioIn { .. } => MessageType::VoiceAssistantAudioIn,
            HubMessage::VoiceAssistantStop => MessageType::VoiceAssistantStop,
            HubMessage::VoiceAssistantPhase { .. } => MessageType::VoiceAssistantPhase,
            HubMessage::VoiceAssistantAudioOut { .. } => MessageType::VoiceAssistantAudioOut,
        }
    }

    fn body_json(&self) -> Result<Vec<u8>, HubProtocolError> {
        let value = match self {
            HubMessage::Hello { node_name } => serde_json::to_vec(&HelloBody {
                node_name: node_name.clone(),
            })?,
            HubMessage::RegisterEntity(entity) | HubMessage::EntityState(entity) => {
                serde_json::to_vec(entity)?
            }
            HubMessage::EntityCommand { key, value } => serde_json::to_vec(&EntityCommandBody {
                key: key.clone(),
                value: value.clone(),
            })?,
            HubMessage::Ping | HubMessage::Pong | HubMessage::VoiceAssistantStop => Vec::new(),
            HubMessage::VoiceAssistantStart { use_vad } => {
                serde_json::to_vec(&VoiceAssistantStartBody { use_vad: *use_vad })?
            }
            HubMessage::VoiceAssistantAudioIn { pcm } | HubMessage::VoiceAssistantAudioOut { pcm } => {
                serde_json::to_vec(&AudioBody {
                    data_b64: encode_b64(pcm),
                })?
            }
            HubMessage::VoiceAssistantPhase { phase } => {
                serde_json::to_vec(&VoiceAssistantPhaseBody { phase: phase.clone() })?
            }
        };
        Ok(value)
    }

    fn from_parts(kind: MessageType, body: &[u8]) -> Result<Self, HubProtocolError> {
        Ok(match kind {
            MessageType::Hello => {
                let parsed: HelloBody = serde_json::from_slice(body)?;
                HubMessage::Hello {
                    node_name: parsed.node_name,
                }
            }
            MessageType::RegisterEntity => HubMessage::RegisterEntity(serde_json::from_slice(body)?),
            MessageType::EntityState => HubMessage::EntityState(serde_json::from_slice(body)?),
            MessageType::EntityCommand => {
                let parsed: EntityCommandBody = serde_json::from_slice(body)?;
                HubMessage::EntityCommand {
                    key: parsed.key,
                    value: parsed.value,
                }
            }
            MessageType::Ping => HubMessage::Ping,
            MessageType::Pong => HubMessage::Pong,
            MessageType::VoiceAssistantStart => {
                let parsed: VoiceAssistantStartBody = serde_json::from_slice(body)?;
                HubMessage::VoiceAssistantStart {
                    use_vad: parsed.use_vad,
                }
            }
            MessageType::VoiceAssistantAudioIn => {
                let parsed: AudioBody = serde_json::from_slice(body)?;
                HubMessage::VoiceAssistantAudioIn {
                    pcm: decode_b64(&parsed.data_b64)?,
                }
            }
            MessageType::VoiceAssistantStop => HubMessage::VoiceAssistantStop,
            MessageType::VoiceAssistantPhase => {
                let parsed: VoiceAssistantPhaseBody = serde_json::from_slice(body)?;
                HubMessage::VoiceAssistantPhase { phase: parsed.phase }
            }
            MessageType::VoiceAssistantAudioOut => {
                let parsed: AudioBody = serde_json::from_slice(body)?;
                HubMessage::VoiceAssistantAudioOut {
                    pcm: decode_b64(&parsed.data_b64)?,
                }
            }
        })
    }
}

/// Minimal base64 codec (no external crate pulled in solely for this):
/// standard alphabet, padded.
const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn encode_b64(input: &[u8]) -> String {
    let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(B64_ALPHABET[(b0 >> 2) as usize] as char);
        out.push(B64_ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            B64_ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            B64_ALPHABET[(b2 & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn decode_b64(input: &str) -> Result<Vec<u8>, HubProtocolError> {
    fn value(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }
    let bytes: Vec<u8> = input.bytes().filter(|&c| c != b'=').collect();
    let mut out = Vec::with_capacity(bytes.len() * 3 / 4);
    for chunk in bytes.chunks(4) {
        let vals: Vec<u8> = chunk
            .iter()
            .map(|&c| value(c).ok_or(HubProtocolError::InvalidBase64))
            .collect::<Result<_, _>>()?;
        out.push((vals[0] << 2) | (vals.get(1).copied().unwrap_or(0) >> 4));
        if vals.len() > 2 {
            out.push((vals[1] << 4) | (vals[2] >> 2));
        }
        if vals.len() > 3 {
            out.push((vals[2] << 6) | vals[3]);
        }
    }
    Ok(out)
}

/// Wraps the two halves of a hub `TcpStream`, framing each message as
/// `[length: u32 BE][type: u8][json body]`.
pub struct HubReader {
    inner: OwnedReadHalf,
}

pub struct HubWriter {
    inner: OwnedWriteHalf,
}

pub fn split(stream: tokio::net::TcpStream) -> (HubReader, HubWriter) {
    let (r, w) = stream.into_split();
    (HubReader { inner: r }, HubWriter { inner: w })
}

impl HubReader {
    pub async fn read_message(&mut self) -> Result<HubMessage, HubProtocolError> {
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf).await?;
        let total_len = u32::from_be_bytes(len_buf);
        if total_len == 0 || total_len > MAX_PAYLOAD_BYTES {
            return Err(HubProtocolError::Oversize(total_len));
        }

        let mut rest = vec![0u8; total_len as usize];
        self.inner.read_exact(&mut rest).await?;
        let kind = MessageType::try_from(rest[0])?;
        HubMessage::from_parts(kind, &rest[1..])
    }
}

impl HubWriter {
    pub async fn write_message(&mut self, message: &HubMessage) -> Result<(), HubProtocolError> {
        let body = message.body_json()?;
        let total_len = (body.len() + 1) as u32;
        let mut frame = Vec::with_capacity(4 + total_len as usize);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.push(message.message_type() as u8);
        frame.extend_from_slice(&body);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn round_trips_an_entity_command_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = split(stream);
            reader.read_message().await.unwrap()
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let (_reader, mut writer) = split(client);
        writer
            .write_message(&HubMessage::EntityCommand {
                key: "switch.vision_enabled".into(),
                value: serde_json::json!(true),
            })
            .await
            .unwrap();

        let received = server.await.unwrap();
        match received {
            HubMessage::EntityCommand { key, value } => {
                assert_eq!(key, "switch.vision_enabled");
                assert_eq!(value, serde_json::json!(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn base64_audio_payload_round_trips() {
        let pcm: Vec<u8> = (0..=255u8).collect();
        let encoded = encode_b64(&pcm);
        let decoded = decode_b64(&encoded).unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn base64_round_trips_non_multiple_of_three_lengths() {
        for len in [0usize, 1, 2, 4, 5, 7] {
            let pcm: Vec<u8> = (0..len as u8).collect();
            let decoded = decode_b64(&encode_b64(&pcm)).unwrap();
            assert_eq!(decoded, pcm);
        }
    }
}

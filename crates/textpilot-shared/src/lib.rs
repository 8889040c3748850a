//! Types shared by the TextPilot server and client: message identity,
//! connection status, the broker event protocol and the HTTP route table.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{LookupKind, SyncError};
pub use protocol::{BrokerEvent, EventKind, SendMessageRequest, StatusSnapshot};
pub use types::{
    ChatId, ChatInfo, ConnectionStatus, Contact, Credentials, GroupInfo, Message, MessageId,
    Participant, SendOptions,
};

//! Domain models for accounts and mail entities

mod account;
mod label;
mod message;
mod thread;

pub use account::{Account, ClientCredentials, OAuthTokens, normalize_email};
pub use label::{LABEL_COLOR_PALETTE, Label, LabelColor, LabelId, LabelUpdate, NewLabel};
pub use message::{AttachmentRef, EmailAddress, Message, MessageId};
pub use thread::{Thread, ThreadId, ThreadPage, ThreadQuery, ThreadSummary};

//! External collaborators: generative model and notification channels

pub mod model_client;
pub mod notification_channel;

pub use model_client::{GenerativeModel, HttpModelClient, ModelClientError, Prompt, ScriptedModel};
pub use notification_channel::{NotificationChannel, OutboxChannel, RecordingChannel, RenderedMessage, WebhookChannel};

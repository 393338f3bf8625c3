/// Typed operations over a `Transport`
use crate::error::{LinkError, Result};
use crate::transport::{Operation, Transport};
use crate::types::{
    AlertsPayload, Conversation, ConversationsPayload, CreatedPayload, InventoryAlert, Message,
    MessagesPayload, NotificationsPayload, SentPayload, UserDescriptor, UsersPayload,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

/// Cheap to clone; every clone talks to the same backend
#[derive(Clone)]
pub struct ChatApi {
    transport: Arc<dyn Transport>,
}

impl ChatApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call_as<T: DeserializeOwned>(&self, op: Operation) -> Result<T> {
        let name = op.name();
        let value = self.transport.call(op).await?;
        // A payload we cannot read is a failed call like any other
        serde_json::from_value(value)
            .map_err(|e| LinkError::Transport(format!("{}: unexpected response: {}", name, e)))
    }

    pub async fn get_conversations(&self) -> Result<Vec<Conversation>> {
        let payload: ConversationsPayload = self.call_as(Operation::GetConversations).await?;
        Ok(payload.conversations)
    }

    pub async fn get_users(&self) -> Result<Vec<UserDescriptor>> {
        let payload: UsersPayload = self.call_as(Operation::GetUsers).await?;
        Ok(payload.users)
    }

    pub async fn get_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let payload: MessagesPayload = self
            .call_as(Operation::GetMessages { conversation_id })
            .await?;
        Ok(payload.messages)
    }

    pub async fn send_message(
        &self,
        conversation_id: i64,
        content: String,
        client_token: Uuid,
    ) -> Result<Option<Message>> {
        let payload: SentPayload = self
            .call_as(Operation::SendMessage {
                conversation_id,
                content,
                client_token,
            })
            .await?;
        Ok(payload.message)
    }

    pub async fn create_conversation(&self, recipient_id: i64) -> Result<i64> {
        let payload: CreatedPayload = self
            .call_as(Operation::CreateConversation { recipient_id })
            .await?;
        Ok(payload.conversation_id)
    }

    pub async fn delete_messages(&self, conversation_id: i64, client_token: Uuid) -> Result<()> {
        self.transport
            .call(Operation::DeleteMessages {
                conversation_id,
                client_token,
            })
            .await?;
        Ok(())
    }

    pub async fn get_notifications(&self) -> Result<NotificationsPayload> {
        self.call_as(Operation::GetNotifications).await
    }

    pub async fn get_inventory_alerts(&self) -> Result<Vec<InventoryAlert>> {
        let payload: AlertsPayload = self.call_as(Operation::GetInventoryAlerts).await?;
        Ok(payload.alerts)
    }

    pub async fn mark_read(&self, notification_id: i64) -> Result<()> {
        self.transport
            .call(Operation::MarkRead { notification_id })
            .await?;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        self.transport.call(Operation::MarkAllRead).await?;
        Ok(())
    }
}

use chrono::Utc;
use uuid::Uuid;

use super::{Store, Tables};
use crate::{
    error::AppError,
    models::{Chat, Message, ProductId, UserId},
};

impl Tables {
    pub fn chat(&self, id: Uuid) -> Option<&Chat> {
        self.chats.get(&id)
    }

    /// Chats the user takes part in, most recently active first.
    pub fn chats_for(&self, user: UserId) -> Vec<&Chat> {
        let mut chats: Vec<&Chat> = self.chats.values().filter(|c| c.is_participant(user)).collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        chats
    }

    /// Messages of a chat, newest first.
    pub fn messages_for(&self, chat: Uuid) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self.messages.values().filter(|m| m.chat == chat).collect();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        messages
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Unread messages in `chat` sent by someone other than `user`.
    pub fn unread_count(&self, chat: Uuid, user: UserId) -> usize {
        self.messages
            .values()
            .filter(|m| m.chat == chat && m.sender != user && !m.is_read)
            .count()
    }

    /// Messages sent to `user` by the other side of any of their chats, newest first.
    pub fn notifications_for(&self, user: UserId, unread_only: bool) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| m.sender != user && (!unread_only || !m.is_read))
            .filter(|m| self.chats.get(&m.chat).is_some_and(|c| c.is_participant(user)))
            .collect();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        messages
    }
}

impl Store {
    /// Opens the chat between `buyer` and the product's owner, reusing an
    /// existing one and pointing it at this product.
    pub fn open_chat(&self, buyer: UserId, product: ProductId) -> Result<Chat, AppError> {
        let mut tables = self.write();

        let owner = tables
            .product(product)
            .ok_or_else(|| AppError::not_found("Product not found."))?
            .seller;
        if owner == buyer {
            return Err(AppError::validation("You cannot start a chat with yourself."));
        }

        let now = Utc::now();
        let existing = tables
            .chats
            .values()
            .find(|c| c.buyer == buyer && c.owner == owner)
            .map(|c| c.id);

        if let Some(id) = existing {
            let chat = tables
                .chats
                .get_mut(&id)
                .ok_or_else(|| AppError::not_found("Chat not found."))?;
            if chat.product != product {
                chat.product = product;
                chat.updated_at = now;
            }
            return Ok(chat.clone());
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            buyer,
            owner,
            product,
            last_message: None,
            created_at: now,
            updated_at: now,
        };
        tables.chats.insert(chat.id, chat.clone());

        Ok(chat)
    }

    pub fn create_message(&self, chat: Uuid, sender: UserId, text: &str) -> Result<Message, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::validation("Message text cannot be empty."));
        }

        let mut tables = self.write();
        let now = Utc::now();

        let target = tables
            .chats
            .get_mut(&chat)
            .ok_or_else(|| AppError::not_found("Chat not found."))?;
        if !target.is_participant(sender) {
            return Err(AppError::forbidden("You are not part of this chat."));
        }

        let message = Message {
            id: Uuid::new_v4(),
            chat,
            sender,
            text: text.to_string(),
            timestamp: now,
            is_read: false,
        };
        target.last_message = Some(message.id);
        target.updated_at = now;

        tables.messages.insert(message.id, message.clone());

        Ok(message)
    }

    /// Marks everything the other side sent in `chat` as read. Returns how many changed.
    pub fn mark_read(&self, chat: Uuid, reader: UserId) -> usize {
        let mut tables = self.write();
        let mut changed = 0;

        for message in tables.messages.values_mut() {
            if message.chat == chat && message.sender != reader && !message.is_read {
                message.is_read = true;
                changed += 1;
            }
        }

        changed
    }

    /// Sender-only delete. The chat's last message falls back to the next newest.
    pub fn delete_message(&self, chat: Uuid, id: Uuid, user: UserId) -> Result<Message, AppError> {
        let mut tables = self.write();

        let message = tables
            .messages
            .get(&id)
            .filter(|m| m.chat == chat)
            .ok_or_else(|| AppError::not_found("Message not found."))?;
        if message.sender != user {
            return Err(AppError::forbidden("You can only delete your own messages."));
        }

        let removed = tables
            .messages
            .remove(&id)
            .ok_or_else(|| AppError::not_found("Message not found."))?;

        let newest = tables.messages_for(chat).first().map(|m| m.id);
        if let Some(target) = tables.chats.get_mut(&chat) {
            if target.last_message == Some(id) {
                target.last_message = newest;
            }
        }

        Ok(removed)
    }
}

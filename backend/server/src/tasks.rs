//! # Tasks
//!
//! Mail that should not hold up a request. Handlers push a [`Task`] onto the queue and a
//! single tokio worker renders and sends it.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use catalog::Money;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
#[error("Mail delivery failed: {0}")]
pub struct MailError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Writes every message to the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "Sending email\n{}", email.body);
        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
    failing: AtomicBool,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<Email> {
        self.sent
            .lock()
            .iter()
            .filter(|e| e.to == address)
            .cloned()
            .collect()
    }

    /// Makes every following send fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError(format!("refusing to send to {}", email.to)));
        }

        self.sent.lock().push(email);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Task {
    OrderPlaced {
        order_id: Uuid,
        email: String,
        name: String,
        total: Money,
        method: &'static str,
        expected_delivery: DateTime<Utc>,
    },
    OrderDelivered {
        order_id: Uuid,
        email: String,
        name: String,
    },
}

impl Task {
    fn render(self, from: &str) -> Email {
        match self {
            Task::OrderPlaced {
                order_id,
                email,
                name,
                total,
                method,
                expected_delivery,
            } => Email {
                from: from.to_string(),
                to: email,
                subject: format!("Your order {order_id} has been placed"),
                body: format!(
                    "Hello {name},\n\
                     Your order {order_id} has been successfully placed.\n\
                     Total: ${total} via {method}.\n\
                     Expected delivery by {}.\n",
                    expected_delivery.format("%Y-%m-%d %H:%M")
                ),
            },
            Task::OrderDelivered {
                order_id,
                email,
                name,
            } => Email {
                from: from.to_string(),
                to: email,
                subject: format!("Your order {order_id} has been delivered"),
                body: format!(
                    "Hello {name},\n\
                     Your order {order_id} has been delivered. Thank you for shopping!"
                ),
            },
        }
    }
}

pub struct TaskQueue {
    sender: UnboundedSender<Task>,
}

impl TaskQueue {
    /// Starts the worker on the current runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>, from: String) -> Self {
        let (sender, mut receiver) = unbounded_channel::<Task>();

        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let email = task.render(&from);
                let to = email.to.clone();

                if let Err(e) = mailer.send(email).await {
                    error!(to = %to, "Background mail failed: {e}");
                }
            }

            info!("Task queue closed");
        });

        Self { sender }
    }

    pub fn enqueue(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!("Task queue worker is gone, dropping task");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn placed_email_wording() {
        let order_id = Uuid::nil();
        let email = Task::OrderPlaced {
            order_id,
            email: "buyer@example.com".into(),
            name: "Ada".into(),
            total: Money::from_cents(2_550),
            method: "City Delivery",
            expected_delivery: Utc.with_ymd_and_hms(2025, 4, 26, 22, 0, 0).unwrap(),
        }
        .render("shop@example.com");

        assert_eq!(email.subject, format!("Your order {order_id} has been placed"));
        assert_eq!(
            email.body,
            format!(
                "Hello Ada,\nYour order {order_id} has been successfully placed.\n\
                 Total: $25.50 via City Delivery.\nExpected delivery by 2025-04-26 22:00.\n"
            )
        );
    }

    #[tokio::test]
    async fn worker_delivers_queued_mail() {
        let mailer = Arc::new(MemoryMailer::new());
        let queue = TaskQueue::spawn(mailer.clone(), "shop@example.com".into());

        queue.enqueue(Task::OrderDelivered {
            order_id: Uuid::nil(),
            email: "buyer@example.com".into(),
            name: "Ada".into(),
        });

        for _ in 0..50 {
            if !mailer.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let sent = mailer.sent_to("buyer@example.com");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.ends_with("Thank you for shopping!"));
    }

    #[tokio::test]
    async fn failed_send_does_not_stop_the_worker() {
        let mailer = Arc::new(MemoryMailer::new());
        let queue = TaskQueue::spawn(mailer.clone(), "shop@example.com".into());
        let delivered = |to: &str| Task::OrderDelivered {
            order_id: Uuid::nil(),
            email: to.into(),
            name: "Ada".into(),
        };

        mailer.set_failing(true);
        queue.enqueue(delivered("lost@example.com"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        mailer.set_failing(false);
        queue.enqueue(delivered("found@example.com"));
        for _ in 0..50 {
            if !mailer.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(mailer.sent_to("lost@example.com").is_empty());
        assert_eq!(mailer.sent_to("found@example.com").len(), 1);
    }
}

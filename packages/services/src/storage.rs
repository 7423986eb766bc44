//! Mail storage service.

use std::collections::HashMap;

use bus_core::Message;
use bus_core::message_type::{MAIL_DELETE, MAIL_LIST, MAIL_MARK, MAIL_RETRIEVE, MAIL_STORE};
use chrono::Utc;
use kernel::{HandlerResult, Service, ServiceContext, ServiceError};

use crate::payload::{
    ListQuery, MailDraft, MailListing, MailRecord, MailSummary, MarkRequest, Outcome, StoreReceipt,
    json_reply, unknown_type,
};

/// Name the service registers under.
pub const SERVICE_NAME: &str = "MailStorageService";

/// In-memory mailbox store.
///
/// Mails get sequential ids starting at "1" and are indexed by recipient in
/// the order they were stored.
#[derive(Debug)]
pub struct MailStorageService {
    mails: HashMap<String, MailRecord>,
    inboxes: HashMap<String, Vec<String>>,
    next_id: u64,
}

impl Default for MailStorageService {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStorageService {
    pub fn new() -> Self {
        Self {
            mails: HashMap::new(),
            inboxes: HashMap::new(),
            next_id: 1,
        }
    }

    fn store(&mut self, draft: MailDraft) -> StoreReceipt {
        let mail_id = self.next_id.to_string();
        self.next_id += 1;

        let mail = MailRecord {
            mail_id: mail_id.clone(),
            from: draft.from,
            to: draft.to,
            subject: draft.subject,
            body: draft.body,
            timestamp: Utc::now().timestamp_millis(),
            read: false,
        };
        tracing::info!("Mail stored: {} from {} to {}", mail_id, mail.from, mail.to);

        self.inboxes
            .entry(mail.to.clone())
            .or_default()
            .push(mail_id.clone());
        self.mails.insert(mail_id.clone(), mail);

        StoreReceipt {
            success: true,
            mail_id,
        }
    }

    /// Fetch a mail and mark it read.
    fn retrieve(&mut self, mail_id: &str) -> Option<MailRecord> {
        let mail = self.mails.get_mut(mail_id)?;
        mail.read = true;
        Some(mail.clone())
    }

    fn list(&self, query: &ListQuery) -> MailListing {
        let ids = self
            .inboxes
            .get(&query.username)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mails = ids
            .iter()
            .take(query.limit)
            .filter_map(|id| self.mails.get(id))
            .map(MailSummary::from)
            .collect();

        MailListing {
            mails,
            total: ids.len(),
        }
    }

    fn delete(&mut self, mail_id: &str) -> Outcome {
        let Some(mail) = self.mails.remove(mail_id) else {
            return Outcome { success: false };
        };

        if let Some(inbox) = self.inboxes.get_mut(&mail.to) {
            inbox.retain(|id| id != mail_id);
        }
        tracing::info!("Mail deleted: {}", mail_id);
        Outcome { success: true }
    }

    fn mark(&mut self, request: &MarkRequest) -> Outcome {
        let Some(mail) = self.mails.get_mut(&request.mail_id) else {
            return Outcome { success: false };
        };
        mail.read = request.read;
        Outcome { success: true }
    }

    /// Number of stored mails.
    pub fn len(&self) -> usize {
        self.mails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mails.is_empty()
    }
}

impl Service for MailStorageService {
    async fn initialize(&mut self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        tracing::info!("MailStorageService initialized");
        Ok(())
    }

    async fn handle(&mut self, _ctx: &ServiceContext, message: Message) -> HandlerResult {
        let reply = match message.message_type() {
            MAIL_STORE => {
                let draft: MailDraft = message.decode_payload()?;
                let receipt = self.store(draft);
                json_reply(&message, SERVICE_NAME, MAIL_STORE, &receipt)?
            }
            MAIL_RETRIEVE => {
                let mail_id: String = message.decode_payload()?;
                match self.retrieve(&mail_id) {
                    Some(mail) => json_reply(&message, SERVICE_NAME, MAIL_RETRIEVE, &mail)?,
                    None => {
                        message.error_reply(SERVICE_NAME, format!("Mail not found: {}", mail_id))
                    }
                }
            }
            MAIL_LIST => {
                let query: ListQuery = message.decode_payload()?;
                json_reply(&message, SERVICE_NAME, MAIL_LIST, &self.list(&query))?
            }
            MAIL_DELETE => {
                let mail_id: String = message.decode_payload()?;
                let outcome = self.delete(&mail_id);
                json_reply(&message, SERVICE_NAME, MAIL_DELETE, &outcome)?
            }
            MAIL_MARK => {
                let request: MarkRequest = message.decode_payload()?;
                let outcome = self.mark(&request);
                json_reply(&message, SERVICE_NAME, MAIL_MARK, &outcome)?
            }
            _ => unknown_type(&message, SERVICE_NAME),
        };
        Ok(Some(reply))
    }

    async fn shutdown(&mut self, _ctx: &ServiceContext) {
        tracing::info!(
            "MailStorageService shutdown, {} mails in store",
            self.mails.len()
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    fn draft(to: &str, subject: &str) -> MailDraft {
        MailDraft {
            from: "user1".into(),
            to: to.into(),
            subject: subject.into(),
            body: "body".into(),
        }
    }

    #[test]
    fn ids_are_sequential() {
        let mut storage = MailStorageService::new();
        assert_eq!(storage.store(draft("user2", "a")).mail_id, "1");
        assert_eq!(storage.store(draft("user2", "b")).mail_id, "2");
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn retrieve_marks_read() {
        let mut storage = MailStorageService::new();
        let id = storage.store(draft("user2", "hi")).mail_id;

        let mail = storage.retrieve(&id).unwrap();
        assert!(mail.read);
        assert_eq!(mail.subject, "hi");
        assert!(storage.retrieve("999").is_none());
    }

    #[test]
    fn list_pages_but_counts_everything() {
        let mut storage = MailStorageService::new();
        for n in 0..5 {
            storage.store(draft("user2", &format!("mail {n}")));
        }
        storage.store(draft("admin", "other"));

        let listing = storage.list(&ListQuery {
            username: "user2".into(),
            limit: 2,
        });
        assert_eq!(listing.total, 5);
        assert_eq!(listing.mails.len(), 2);
        assert_eq!(listing.mails[0].subject, "mail 0");

        let empty = storage.list(&ListQuery {
            username: "nobody".into(),
            limit: 10,
        });
        assert_eq!(empty.total, 0);
        assert!(empty.mails.is_empty());
    }

    #[test]
    fn delete_removes_from_inbox() {
        let mut storage = MailStorageService::new();
        let id = storage.store(draft("user2", "bye")).mail_id;

        assert!(storage.delete(&id).success);
        assert!(!storage.delete(&id).success);

        let listing = storage.list(&ListQuery {
            username: "user2".into(),
            limit: 10,
        });
        assert_eq!(listing.total, 0);
    }

    #[test]
    fn mark_sets_read_flag() {
        let mut storage = MailStorageService::new();
        let id = storage.store(draft("user2", "flag")).mail_id;

        let outcome = storage.mark(&MarkRequest {
            mail_id: id.clone(),
            read: true,
        });
        assert!(outcome.success);
        assert!(storage.mails[&id].read);

        let missing = storage.mark(&MarkRequest {
            mail_id: "nope".into(),
            read: true,
        });
        assert!(!missing.success);
    }
}

// =============================================================================
// NEWSLETTER
// =============================================================================
// Fan-out of one message to every subscribed user.
//
// At most `concurrency` sends are in flight at once. A failed send is counted
// and logged; it never fails the broadcast.
// =============================================================================

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::error::{AppError, AppResult};
use crate::models::{NewsletterReport, NewsletterRequest};
use crate::notify::Notifier;
use crate::store::Store;

#[derive(Clone)]
pub struct Newsletter {
    store: Arc<dyn Store>,
    notifier: Notifier,
    semaphore: Arc<Semaphore>,
}

impl Newsletter {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, concurrency: usize) -> Self {
        Self {
            store,
            notifier,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn send(&self, request: NewsletterRequest) -> AppResult<NewsletterReport> {
        if request.subject.trim().is_empty() || request.body.trim().is_empty() {
            return Err(AppError::Validation(
                "newsletter subject and body must not be empty".into(),
            ));
        }

        let subscribers = self.store.newsletter_subscribers().await?;
        let recipients = subscribers.len();
        tracing::info!(recipients, "Sending newsletter");

        let failed = Arc::new(Mutex::new(0usize));
        let subject = Arc::new(request.subject);
        let body = Arc::new(request.body);
        let mut tasks = JoinSet::new();

        for subscriber in subscribers {
            let semaphore = self.semaphore.clone();
            let notifier = self.notifier.clone();
            let failed = failed.clone();
            let subject = subject.clone();
            let body = body.clone();

            tasks.spawn(async move {
                let delivered = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let text = format!("Hi {},\n\n{}", subscriber.first_name, body);
                        notifier
                            .send_best_effort("newsletter", &subscriber.email, &subject, &text)
                            .await
                    }
                    Err(_) => false,
                };
                if !delivered {
                    *failed.lock().await += 1;
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Newsletter send task panicked");
                *failed.lock().await += 1;
            }
        }

        let failed = *failed.lock().await;
        let report = NewsletterReport {
            recipients,
            sent: recipients - failed,
            failed,
        };
        tracing::info!(
            recipients = report.recipients,
            sent = report.sent,
            failed = report.failed,
            "Newsletter finished"
        );
        Ok(report)
    }
}

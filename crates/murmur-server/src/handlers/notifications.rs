use tracing::debug;

use murmur_shared::protocol::UpdateNotificationRequest;
use murmur_shared::ServerAction;

use crate::context::ConnectionContext;
use crate::dispatch::Effect;
use crate::error::RelayError;
use crate::fanout;

use super::Services;

pub async fn update_notification(
    services: &Services,
    ctx: &ConnectionContext,
    req: UpdateNotificationRequest,
) -> Result<Vec<Effect>, RelayError> {
    if req.notification.id.trim().is_empty() {
        return Err(RelayError::BadRequest("notification.id is required".into()));
    }

    let updated = services
        .collaborators
        .update_notification(&ctx.request_context(), &req.notification)
        .await?;

    debug!(
        connection = %ctx.id.short(),
        notification = %req.notification.id,
        "Notification updated"
    );
    Ok(vec![Effect::to_origin(fanout::payload(
        ServerAction::NotificationUpdated,
        &updated,
    ))])
}

#[cfg(test)]
mod tests {
    use murmur_shared::protocol::NotificationUpdate;
    use murmur_shared::ClientAction;

    use crate::testing::{Call, TestRelay};

    use super::*;

    #[tokio::test]
    async fn test_update_is_persisted_and_echoed() {
        let t = TestRelay::new();
        let mut a = t.connect("ca", "ua", "A").await;
        a.drain();

        t.send(
            &mut a,
            ClientAction::UpdateNotification(UpdateNotificationRequest {
                notification: NotificationUpdate {
                    id: "n1".into(),
                    is_unread: Some(false),
                    ..Default::default()
                },
                user_name: Some("A".into()),
            }),
        )
        .await;

        let updated = a.take(ServerAction::NotificationUpdated);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].data["id"], "n1");
        assert_eq!(updated[0].data["isUnread"], false);
        assert!(matches!(
            t.collaborators.calls().as_slice(),
            [Call::NotificationUpdate(update)] if update.id == "n1"
        ));
    }

    #[tokio::test]
    async fn test_missing_id_rejected() {
        let t = TestRelay::new();
        let mut a = t.connect("ca", "ua", "A").await;
        a.drain();

        t.send(
            &mut a,
            ClientAction::UpdateNotification(UpdateNotificationRequest::default()),
        )
        .await;
        assert_eq!(a.take(ServerAction::Error).len(), 1);
        assert!(t.collaborators.calls().is_empty());
    }
}

use chrono::Utc;
use tracing::debug;

use parley_db::format_timestamp;
use parley_db::models::MessageRow;
use parley_types::api::{
    ChannelMessageRequest, GetChannelMessagesRequest, GetMessagesRequest, RecentMessagesRequest,
    Reply, SendMessageRequest, clamp_limit,
};
use parley_types::error::ActionError;
use parley_types::models::Message;

use crate::session::Caller;
use crate::{AppState, blocking, new_id, require_non_empty};

/// Store a direct message. Encrypted content is stored as-is; the server never
/// inspects envelopes.
pub async fn send_message(
    state: &AppState,
    caller: Caller,
    req: SendMessageRequest,
) -> Result<Reply, ActionError> {
    require_non_empty(&req.content, "message content")?;

    let message = blocking(state, move |s| {
        if s.db.get_user_by_id(&req.to)?.is_none() {
            return Err(ActionError::NotFound("Recipient"));
        }
        let row = MessageRow {
            id: new_id(),
            sender_id: caller.user_id,
            recipient_id: Some(req.to),
            channel_id: None,
            content: req.content,
            encrypted: req.encrypted,
            created_at: format_timestamp(Utc::now()),
        };
        s.db.insert_direct_message(&row)?;
        Ok(Message::from(row))
    })
    .await?;

    debug!(
        "Direct message {} stored (encrypted: {})",
        message.id, message.encrypted
    );
    Ok(Reply::Message(message))
}

pub async fn send_channel_message(
    state: &AppState,
    caller: Caller,
    req: ChannelMessageRequest,
) -> Result<Reply, ActionError> {
    require_non_empty(&req.content, "message content")?;

    let message = blocking(state, move |s| {
        if s.db.get_channel(&req.channel_id)?.is_none() {
            return Err(ActionError::NotFound("Channel"));
        }
        let row = MessageRow {
            id: new_id(),
            sender_id: caller.user_id,
            recipient_id: None,
            channel_id: Some(req.channel_id),
            content: req.content,
            encrypted: req.encrypted,
            created_at: format_timestamp(Utc::now()),
        };
        // Membership is re-checked under the insert's lock.
        if !s.db.insert_channel_message(&row)? {
            return Err(ActionError::NotChannelMember);
        }
        Ok(Message::from(row))
    })
    .await?;

    debug!("Channel message {} stored", message.id);
    Ok(Reply::Message(message))
}

/// The conversation between the caller and `other_user_id`, newest first.
pub async fn get_messages(
    state: &AppState,
    caller: Caller,
    req: GetMessagesRequest,
) -> Result<Reply, ActionError> {
    let limit = clamp_limit(req.limit);
    let rows = blocking(state, move |s| {
        Ok(s.db
            .get_messages_between(&caller.user_id, &req.other_user_id, limit)?)
    })
    .await?;

    Ok(Reply::Messages(rows.into_iter().map(Message::from).collect()))
}

pub async fn get_channel_messages(
    state: &AppState,
    caller: Caller,
    req: GetChannelMessagesRequest,
) -> Result<Reply, ActionError> {
    let limit = clamp_limit(req.limit);
    let rows = blocking(state, move |s| {
        if s.db.get_channel(&req.channel_id)?.is_none() {
            return Err(ActionError::NotFound("Channel"));
        }
        if !s.db.is_channel_member(&req.channel_id, &caller.user_id)? {
            return Err(ActionError::NotChannelMember);
        }
        Ok(s.db.get_channel_messages(&req.channel_id, limit)?)
    })
    .await?;

    Ok(Reply::Messages(rows.into_iter().map(Message::from).collect()))
}

/// Direct messages in either direction plus traffic in the caller's channels.
pub async fn get_recent_messages(
    state: &AppState,
    caller: Caller,
    req: RecentMessagesRequest,
) -> Result<Reply, ActionError> {
    let limit = clamp_limit(req.limit);
    let rows = blocking(state, move |s| {
        Ok(s.db.get_recent_messages(&caller.user_id, limit)?)
    })
    .await?;

    Ok(Reply::Messages(rows.into_iter().map(Message::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::create_channel;
    use crate::test_support::{register, state};
    use parley_types::api::{CreateChannelRequest, DEFAULT_LIMIT};

    fn dm(to: &str, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            to: to.into(),
            content: content.into(),
            encrypted: false,
        }
    }

    fn history(other: &str) -> GetMessagesRequest {
        GetMessagesRequest {
            other_user_id: other.into(),
            limit: DEFAULT_LIMIT,
        }
    }

    fn messages(reply: Reply) -> Vec<Message> {
        match reply {
            Reply::Messages(messages) => messages,
            other => panic!("expected messages, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn direct_message_visible_only_to_participants() {
        let state = state();
        let (alice, _) = register(&state, "alice").await;
        let (bob, _) = register(&state, "bob").await;
        let (dave, _) = register(&state, "dave").await;

        let Reply::Message(sent) = send_message(&state, alice.clone(), dm(&bob.user_id, "hi bob"))
            .await
            .unwrap()
        else {
            panic!("expected message");
        };
        assert_eq!(sent.sender_id, alice.user_id);
        assert_eq!(sent.recipient_id.as_deref(), Some(bob.user_id.as_str()));

        let seen = messages(get_messages(&state, bob, history(&alice.user_id)).await.unwrap());
        assert_eq!(seen, vec![sent]);

        let none = messages(get_messages(&state, dave, history(&alice.user_id)).await.unwrap());
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn encrypted_flag_is_preserved() {
        let state = state();
        let (alice, _) = register(&state, "alice").await;
        let (bob, _) = register(&state, "bob").await;

        let req = SendMessageRequest {
            encrypted: true,
            ..dm(&bob.user_id, "ZW52ZWxvcGU=")
        };
        send_message(&state, alice.clone(), req).await.unwrap();

        let seen = messages(get_messages(&state, bob, history(&alice.user_id)).await.unwrap());
        assert!(seen[0].encrypted);
        assert_eq!(seen[0].content, "ZW52ZWxvcGU=");
    }

    #[tokio::test]
    async fn unknown_recipient_and_empty_content_rejected() {
        let state = state();
        let (alice, _) = register(&state, "alice").await;

        let err = send_message(&state, alice.clone(), dm("ghost", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Recipient not found");

        let err = send_message(&state, alice.clone(), dm(&alice.user_id, "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));
    }

    #[tokio::test]
    async fn channel_posting_requires_membership() {
        let state = state();
        let (alice, _) = register(&state, "alice").await;
        let (bob, _) = register(&state, "bob").await;
        let (carol, _) = register(&state, "carol").await;

        let Reply::Channel(channel) = create_channel(
            &state,
            alice.clone(),
            CreateChannelRequest {
                name: "team".into(),
                description: String::new(),
                members: vec![bob.user_id.clone()],
            },
        )
        .await
        .unwrap() else {
            panic!("expected channel");
        };

        let post = |content: &str| ChannelMessageRequest {
            channel_id: channel.id.clone(),
            content: content.into(),
            encrypted: false,
        };

        send_channel_message(&state, bob.clone(), post("from bob"))
            .await
            .unwrap();
        let err = send_channel_message(&state, carol.clone(), post("from carol"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "user is not a member of this channel");

        let read = GetChannelMessagesRequest {
            channel_id: channel.id.clone(),
            limit: DEFAULT_LIMIT,
        };
        assert_eq!(
            messages(get_channel_messages(&state, alice, read.clone()).await.unwrap()).len(),
            1
        );
        assert!(matches!(
            get_channel_messages(&state, carol, read).await,
            Err(ActionError::NotChannelMember)
        ));
    }

    #[tokio::test]
    async fn posting_to_missing_channel() {
        let state = state();
        let (alice, _) = register(&state, "alice").await;
        let err = send_channel_message(
            &state,
            alice,
            ChannelMessageRequest {
                channel_id: "nope".into(),
                content: "hi".into(),
                encrypted: false,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Channel not found");
    }

    #[tokio::test]
    async fn recent_messages_respect_limit() {
        let state = state();
        let (alice, _) = register(&state, "alice").await;
        let (bob, _) = register(&state, "bob").await;
        for i in 0..5 {
            send_message(&state, alice.clone(), dm(&bob.user_id, &format!("m{i}")))
                .await
                .unwrap();
        }

        let recent = messages(
            get_recent_messages(&state, bob, RecentMessagesRequest { limit: 3 })
                .await
                .unwrap(),
        );
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
    }
}

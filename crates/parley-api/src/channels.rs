use chrono::Utc;
use tracing::info;

use parley_db::format_timestamp;
use parley_db::models::ChannelRow;
use parley_types::api::{ChannelMemberRequest, CreateChannelRequest, Reply};
use parley_types::error::ActionError;
use parley_types::models::Channel;

use crate::session::Caller;
use crate::{AppState, AppStateInner, blocking, new_id, require_non_empty};

pub const MAX_CHANNEL_NAME_LEN: usize = 64;

/// Create a channel. The creator is always a member; every listed member must
/// be a registered user.
pub async fn create_channel(
    state: &AppState,
    caller: Caller,
    req: CreateChannelRequest,
) -> Result<Reply, ActionError> {
    require_non_empty(&req.name, "channel name")?;
    if req.name.chars().count() > MAX_CHANNEL_NAME_LEN {
        return Err(ActionError::validation(format!(
            "channel name must be at most {MAX_CHANNEL_NAME_LEN} characters"
        )));
    }

    let mut members = vec![caller.user_id.clone()];
    for member in req.members {
        if !members.contains(&member) {
            members.push(member);
        }
    }

    let channel = blocking(state, move |s| {
        for member in &members {
            if s.db.get_user_by_id(member)?.is_none() {
                return Err(ActionError::NotFound("User"));
            }
        }
        let row = ChannelRow {
            id: new_id(),
            name: req.name,
            description: req.description,
            created_by: caller.user_id,
            created_at: format_timestamp(Utc::now()),
            members,
        };
        s.db.create_channel(&row)?;
        Ok(Channel::from(row))
    })
    .await?;

    info!(
        "Channel {} created with {} members",
        channel.id,
        channel.members.len()
    );
    Ok(Reply::Channel(channel))
}

pub async fn get_user_channels(state: &AppState, caller: Caller) -> Result<Reply, ActionError> {
    let rows = blocking(state, move |s| Ok(s.db.get_user_channels(&caller.user_id)?)).await?;
    Ok(Reply::Channels(rows.into_iter().map(Channel::from).collect()))
}

/// Any current member may add a registered user.
pub async fn add_user_to_channel(
    state: &AppState,
    caller: Caller,
    req: ChannelMemberRequest,
) -> Result<Reply, ActionError> {
    blocking(state, move |s| {
        require_member(s, &req.channel_id, &caller.user_id)?;
        if s.db.get_user_by_id(&req.user_id)?.is_none() {
            return Err(ActionError::NotFound("User"));
        }
        let joined_at = format_timestamp(Utc::now());
        if !s.db.add_channel_member(&req.channel_id, &req.user_id, &joined_at)? {
            return Err(ActionError::AlreadyChannelMember);
        }
        info!("User {} added to channel {}", req.user_id, req.channel_id);
        Ok(())
    })
    .await?;

    Ok(Reply::Empty)
}

/// Any current member may remove another member, or leave. The creator stays.
pub async fn remove_user_from_channel(
    state: &AppState,
    caller: Caller,
    req: ChannelMemberRequest,
) -> Result<Reply, ActionError> {
    blocking(state, move |s| {
        let channel = require_member(s, &req.channel_id, &caller.user_id)?;
        if channel.created_by == req.user_id {
            return Err(ActionError::CreatorRemoval);
        }
        if !s.db.remove_channel_member(&req.channel_id, &req.user_id)? {
            return Err(ActionError::NotChannelMember);
        }
        info!("User {} removed from channel {}", req.user_id, req.channel_id);
        Ok(())
    })
    .await?;

    Ok(Reply::Empty)
}

fn require_member(
    s: &AppStateInner,
    channel_id: &str,
    user_id: &str,
) -> Result<ChannelRow, ActionError> {
    let channel = s
        .db
        .get_channel(channel_id)?
        .ok_or(ActionError::NotFound("Channel"))?;
    if !channel.members.iter().any(|m| m == user_id) {
        return Err(ActionError::NotChannelMember);
    }
    Ok(channel)
}

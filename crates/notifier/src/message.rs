use pollcast_common::types::NotificationRecord;

/// Body of the message sent to users eligible to vote on a new poll.
pub fn compose_message(record: &NotificationRecord) -> String {
    format!(
        "👋 Hey @{}!\n\n\
         The user {} created a new poll!\n\n\
         🗳 And you're eligible to vote!\n\n\
         Cast your vote to make a difference 👇",
        record.recipient_username, record.author_username
    )
}

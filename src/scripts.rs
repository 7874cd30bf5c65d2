/// Names of the registered vault scripts and collections the client calls
///
/// These must match the scripts registered on the vault side at channel
/// creation time.

pub const SCRIPT_QUERY_CHANNEL_INFO: &str = "query_channel_info";
pub const SCRIPT_QUERY_POSTS_BY_CHANNEL: &str = "query_posts_by_channel";
pub const SCRIPT_QUERY_SPECIFIED_POST: &str = "query_specified_post";
pub const SCRIPT_QUERY_COMMENTS_BY_POST: &str = "query_comments_by_post";
pub const SCRIPT_QUERY_COMMENT_BY_ID: &str = "query_comment_by_id";
pub const SCRIPT_SUBSCRIBE_CHANNEL: &str = "subscribe_channel";
pub const SCRIPT_UNSUBSCRIBE_CHANNEL: &str = "unsubscribe_channel";

pub const COLLECTION_CHANNELS: &str = "channels";
pub const COLLECTION_SUBSCRIPTIONS: &str = "subscribed_channels";

/// Record id fields, most specific first; the first present names a record
pub const ID_FIELDS: [&str; 3] = ["comment_id", "post_id", "channel_id"];

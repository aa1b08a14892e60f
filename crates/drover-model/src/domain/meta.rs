/// Schema-less key/value payload attached to a job.
///
/// Job kinds vary, so metadata stays a string-keyed map of JSON values
/// that the engine never interprets. Must not contain secrets; it is
/// visible to every status query.
pub type JobMeta = serde_json::Map<String, serde_json::Value>;

mod requester;

pub use requester::{describe_device, requester_device, MAX_USER_AGENT_LEN};

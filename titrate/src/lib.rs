#![doc(issue_tracker_base_url = "https://github.com/chainbound/titrate/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use titrate_buffer::*;
pub use titrate_common::{constants, Timestamp, TimerQueue};
pub use titrate_node::*;
pub use titrate_policy::*;

/*!
# Warden DevKit - in-memory doubles and test harness

Lets the warden run end to end without a chat platform or cloud provider:
- `MockChatClient`: live message store with call recording and failure injection
- `MockProvider`: server table per credential with failure injection
- `TestHarness`: wires both into a reconciler or a full `Warden`
*/

pub mod chat_stub;
pub mod provider_stub;
pub mod test_utils;

pub use chat_stub::{ChatCall, MockChatClient, StoredMessage};
pub use provider_stub::{server, FakeServer, MockProvider, GIB};
pub use test_utils::TestHarness;

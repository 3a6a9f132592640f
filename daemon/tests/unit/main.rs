//! Integration tests for the sync daemon

mod mock_vcs;

mod test_app_state;
mod test_server;

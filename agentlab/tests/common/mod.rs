pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{
    assert_contains, assert_exit, assert_not_contains, assert_path_exists, assert_ssh_command,
    json_error,
};
pub use fixtures::{CliHome, MockDaemon, stderr_of, stdout_of};
pub use logging::init_test_logging;

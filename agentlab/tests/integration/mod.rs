mod command_tests;
mod connect_tests;
mod job_tests;
mod sandbox_tests;
mod ssh_tests;
#[cfg(unix)]
mod socket_tests;

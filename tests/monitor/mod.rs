mod scenario_tests;
mod shutdown_tests;
mod snapshot_tests;

mod manifest_tests;
mod reconcile_tests;

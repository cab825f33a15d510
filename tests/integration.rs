#[path = "integration/fixtures/mod.rs"]
mod fixtures;

#[path = "integration/client/mod.rs"]
mod client;
#[path = "integration/apps/mod.rs"]
mod apps;
#[path = "integration/cli/mod.rs"]
mod cli;

// Aggregates all former standalone integration tests as modules.
mod invariants;
mod pass_controller;
mod sqlite_pass;

//! Integration tests: whole cycles against an in-memory exchange.

mod simulation;

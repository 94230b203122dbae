//! Distributed energy resource co-simulation: solar and battery units on a
//! distribution feeder, stepped under a granted-time contract with a
//! transmission federate.

pub mod config;
/// Message-bus contract and the in-process federation.
pub mod cosim;
pub mod devices;
pub mod io;
pub mod reporting;
pub mod runner;
/// Orchestrator, dispatch policies, feeder solver and KPIs.
pub mod sim;
pub mod study;
pub mod telemetry;

/*!
# Station DevKit - simulated stations and test utilities

Helpers for exercising the station kernel without field hardware:
- Report builder that formats and signs readings like the firmware
- Simulated station TCP client (pending slot, reconnect)
- Test harness running a kernel on an ephemeral port
*/

pub mod device_stub;
pub mod report_builder;
pub mod test_utils;

pub use device_stub::SimulatedStation;
pub use report_builder::{ReportBuilder, SensorReadings, SignedScope};
pub use test_utils::{StoredReport, TestHarness};

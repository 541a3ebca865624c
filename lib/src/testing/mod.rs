//! Test harness shared by the netcore crates.
//!
//! Tests are plain `pub fn test_*() -> TestResult` functions built from the
//! assertion macros in this module.  [`define_test_suite!`] registers a list
//! of them with the host test runner, one `#[test]` per function.

mod assertions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skipped,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Run one test function and turn a failure into a panic for the host runner.
pub fn run_single_test(name: &str, test: fn() -> TestResult) -> TestResult {
    let result = test();
    if result.is_failure() {
        panic!("test {} failed", name);
    }
    result
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($msg:expr) => {{
        $crate::klog_info!("TEST FAIL: {}", $msg);
        $crate::testing::TestResult::Fail
    }};
    ($fmt:expr, $($arg:tt)*) => {{
        $crate::klog_info!(concat!("TEST FAIL: ", $fmt), $($arg)*);
        $crate::testing::TestResult::Fail
    }};
}

#[macro_export]
macro_rules! define_test_suite {
    ($suite_name:ident, [$($test_fn:ident),* $(,)?]) => {
        $crate::paste::paste! {
            $(
                #[test]
                fn [<$suite_name _ $test_fn>]() {
                    $crate::testing::run_single_test(stringify!($test_fn), $test_fn);
                }
            )*
        }
    };
}

//! Assertion macros returning `TestResult::Fail` instead of panicking.
//!
//! Every failure line is tagged with the source location so a failing suite
//! can be traced without a backtrace.

#[macro_export]
macro_rules! assert_test {
    ($cond:expr) => {{
        if !$cond {
            $crate::klog_info!("{}:{}: ASSERT: {}", file!(), line!(), stringify!($cond));
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($cond:expr, $msg:expr) => {{
        if !$cond {
            $crate::klog_info!("{}:{}: ASSERT: {}", file!(), line!(), $msg);
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {{
        if !$cond {
            $crate::klog_info!(concat!("{}:{}: ASSERT: ", $fmt), file!(), line!(), $($arg)*);
            return $crate::testing::TestResult::Fail;
        }
    }};
}

#[macro_export]
macro_rules! assert_eq_test {
    ($left:expr, $right:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            $crate::klog_info!(
                "{}:{}: ASSERT_EQ: expected {:?}, got {:?}",
                file!(),
                line!(),
                right,
                left
            );
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($left:expr, $right:expr, $msg:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            $crate::klog_info!(
                "{}:{}: ASSERT_EQ: {} - expected {:?}, got {:?}",
                file!(),
                line!(),
                $msg,
                right,
                left
            );
            return $crate::testing::TestResult::Fail;
        }
    }};
}

/// Unwrap an `Ok`, failing the test on `Err`.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {{
        match $result {
            Ok(v) => v,
            Err(e) => {
                $crate::klog_info!("{}:{}: ASSERT_OK: got Err({:?})", file!(), line!(), e);
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
    ($result:expr, $msg:expr) => {{
        match $result {
            Ok(v) => v,
            Err(e) => {
                $crate::klog_info!("{}:{}: ASSERT_OK: {} - got Err({:?})", file!(), line!(), $msg, e);
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
}

/// Require a specific `Err` value.
#[macro_export]
macro_rules! assert_err {
    ($result:expr, $expected:expr) => {{
        match $result {
            Err(e) if e == $expected => {}
            Err(e) => {
                $crate::klog_info!(
                    "{}:{}: ASSERT_ERR: expected Err({:?}), got Err({:?})",
                    file!(),
                    line!(),
                    $expected,
                    e
                );
                return $crate::testing::TestResult::Fail;
            }
            Ok(_) => {
                $crate::klog_info!(
                    "{}:{}: ASSERT_ERR: expected Err({:?}), got Ok",
                    file!(),
                    line!(),
                    $expected
                );
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
    ($result:expr, $expected:expr, $msg:expr) => {{
        match $result {
            Err(e) if e == $expected => {}
            Err(e) => {
                $crate::klog_info!(
                    "{}:{}: ASSERT_ERR: {} - expected Err({:?}), got Err({:?})",
                    file!(),
                    line!(),
                    $msg,
                    $expected,
                    e
                );
                return $crate::testing::TestResult::Fail;
            }
            Ok(_) => {
                $crate::klog_info!(
                    "{}:{}: ASSERT_ERR: {} - expected Err({:?}), got Ok",
                    file!(),
                    line!(),
                    $msg,
                    $expected
                );
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
}

//! Internal testing utilities for the rten-opt crates.

use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe, RefUnwindSafe};

/// Run a table of test cases, reporting every failing case instead of
/// stopping at the first one.
///
/// Implemented for any collection of cases. A case type, conventionally named
/// `Case`, holds the inputs and expectations for one scenario:
///
/// ```
/// use rten_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     stride: usize,
///     factor: usize,
///     expected: usize,
/// }
///
/// let cases = [
///     Case { stride: 1, factor: 2, expected: 2 },
///     Case { stride: 2, factor: 2, expected: 4 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.stride * case.factor, case.expected);
/// });
/// ```
///
/// Test functions may build graphs and other state with interior mutability
/// internally, but values captured by the closure must be unwind safe.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case.
    ///
    /// Panics after all cases have run if any of them panicked. The panic
    /// message lists the index and debug representation of each failure.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug;

    /// Variant of [`test_each`](TestCases::test_each) which passes each case
    /// by value.
    ///
    /// The debug representation of a case is captured before it is moved into
    /// the test function.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug;
}

fn report_failures(failures: Vec<(usize, String)>) {
    if failures.is_empty() {
        return;
    }
    let details: Vec<String> = failures
        .iter()
        .map(|(index, case)| format!("#{}: {}", index, case))
        .collect();
    panic!(
        "{} test cases failed:\n{}",
        failures.len(),
        details.join("\n")
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        I::Item: Debug,
    {
        let test = &test;
        let mut failures = Vec::new();
        for (index, case) in self.into_iter().enumerate() {
            // Move the whole wrapper into the closure. Referring only to its
            // field would capture the field alone, which is not unwind safe.
            let case_ref = AssertUnwindSafe(&case);
            if catch_unwind(move || {
                let wrapper = case_ref;
                test(wrapper.0)
            })
            .is_err()
            {
                failures.push((index, format!("{:?}", case)));
            }
        }
        report_failures(failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        I::Item: Debug,
    {
        let test = &test;
        let mut failures = Vec::new();
        for (index, case) in self.into_iter().enumerate() {
            let description = format!("{:?}", case);
            let case = AssertUnwindSafe(case);
            if catch_unwind(move || {
                let wrapper = case;
                test(wrapper.0)
            })
            .is_err()
            {
                failures.push((index, description));
            }
        }
        report_failures(failures);
    }
}

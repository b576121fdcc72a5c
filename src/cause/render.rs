//! Human-readable rendering of a [`Cause`].

use std::fmt::Debug;

use super::{Cause, CauseView};

const INDENT: &str = "  ";

enum Item<'a, E> {
    Visit(&'a Cause<E>, usize),
    Line(String, usize),
}

impl<E: Debug> Cause<E> {
    /// Renders the cause for humans.
    ///
    /// Unhandled typed failures, defects and interruptions are each named
    /// explicitly. Sequential steps are separated by `then:`, and parallel
    /// failures are listed as indented branches.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::cause::Cause;
    /// use strand::fiber::FiberId;
    ///
    /// let rendered = Cause::fail("e").then(Cause::interrupt(FiberId::new(0, 2))).pretty();
    /// assert_eq!(
    ///     rendered,
    ///     "Fiber failed.\n\
    ///      A checked error was not handled.\n\
    ///      \"e\"\n\
    ///      then:\n\
    ///      An interrupt was produced by #2."
    /// );
    /// ```
    pub fn pretty(&self) -> String {
        let mut output = String::from("Fiber failed.");
        let mut work = vec![Item::Visit(self, 0)];

        while let Some(item) = work.pop() {
            match item {
                Item::Line(text, depth) => push_line(&mut output, depth, &text),
                Item::Visit(cause, depth) => match cause.view() {
                    CauseView::Empty => push_line(&mut output, depth, "No failure was recorded."),
                    CauseView::Fail(error) => {
                        push_line(&mut output, depth, "A checked error was not handled.");
                        push_line(&mut output, depth, &format!("{error:?}"));
                    }
                    CauseView::Die(defect) => {
                        push_line(&mut output, depth, "An unchecked error was produced.");
                        push_line(&mut output, depth, &defect.to_string());
                    }
                    CauseView::Interrupt(fiber_id) => push_line(
                        &mut output,
                        depth,
                        &format!("An interrupt was produced by {fiber_id}."),
                    ),
                    CauseView::Then(left, right) => {
                        work.push(Item::Visit(right, depth));
                        work.push(Item::Line("then:".to_string(), depth));
                        work.push(Item::Visit(left, depth));
                    }
                    CauseView::Both(..) => {
                        let branches = parallel_branches(cause);
                        for (index, branch) in branches.iter().enumerate().rev() {
                            work.push(Item::Visit(branch, depth + 2));
                            work.push(Item::Line(format!("branch {}:", index + 1), depth + 1));
                        }
                        work.push(Item::Line("in parallel:".to_string(), depth));
                    }
                },
            }
        }

        output
    }
}

/// Flattens nested `Both` nodes into their non-`Both` branches, left to right.
fn parallel_branches<E>(cause: &Cause<E>) -> Vec<&Cause<E>> {
    let mut branches = Vec::new();
    let mut stack = vec![cause];
    while let Some(current) = stack.pop() {
        if let CauseView::Both(left, right) = current.view() {
            stack.push(right);
            stack.push(left);
        } else {
            branches.push(current);
        }
    }
    branches
}

fn push_line(output: &mut String, depth: usize, text: &str) {
    output.push('\n');
    for _ in 0..depth {
        output.push_str(INDENT);
    }
    output.push_str(text);
}

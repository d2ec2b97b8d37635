pub use colored::Colorize;
use ndarray::{ArrayD, Dimension};

#[macro_export]
macro_rules! print_red {
    ($($arg:tt)*) => {
        println!("{}", $crate::ddag::common::logging::Colorize::red(format!($($arg)*).as_str()));
    };
}

#[macro_export]
macro_rules! print_green {
    ($($arg:tt)*) => {
        println!("{}", $crate::ddag::common::logging::Colorize::green(format!($($arg)*).as_str()));
    };
}

#[macro_export]
macro_rules! print_yellow {
    ($($arg:tt)*) => {
        println!("{}", $crate::ddag::common::logging::Colorize::yellow(format!($($arg)*).as_str()));
    };
}

#[macro_export]
macro_rules! print_blue {
    ($($arg:tt)*) => {
        println!("{}", $crate::ddag::common::logging::Colorize::blue(format!($($arg)*).as_str()));
    };
}

/// One line per cell of a table, `[i, j, ..] p`, with the probability bolded.
pub fn format_table(table: &ArrayD<f64>) -> Vec<String> {
    table
        .indexed_iter()
        .map(|(index, p)| {
            let index: Vec<String> = index.slice().iter().map(|i| i.to_string()).collect();
            format!("[{}] {}", index.join(", "), format!("{:.6}", p).bold())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddag::common::error::DagError;
    use ndarray::arr2;

    #[test]
    fn test_format_table_lists_every_cell() {
        colored::control::set_override(false);
        let lines = format_table(&arr2(&[[0.25, 0.75], [1.0, 0.0]]).into_dyn());
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "[0, 1] 0.750000");
        assert_eq!(lines[3], "[1, 1] 0.000000");
    }

    #[test]
    fn test_print_macros_accept_format_arguments() {
        print_red!("error: {}", DagError::UnknownNode(4));
        print_green!("{} done", 3);
        print_yellow!("plain");
        print_blue!("P({})", "0, 1");
    }
}

//! User-facing text. The bot speaks English only.

use pb_render::RenderConfig;

pub const HELP: &str = "Send me some image.";
pub const ERROR: &str = "Something went wrong! Please try again in a few minutes.";
pub const STATUS_EMPTY: &str = "There aren't any operations in the queue.";
pub const OPERATIONS_LIMIT: &str = "You can't add more operations to the queue.";
pub const INCORRECT_VALUE: &str = "Incorrect value!";

pub const STATUS_COMMAND: &str = "/status";

pub fn input_prompt(min: i64, max: i64) -> String {
    format!("Enter a number between {min} and {max}:")
}

pub fn input_reprompt(min: i64, max: i64) -> String {
    format!("{INCORRECT_VALUE}\n{}", input_prompt(min, max))
}

/// Queue position plus the settings the operation will run with.
pub fn status_report(position: usize, config: &RenderConfig) -> String {
    format!(
        "{position} place in the queue.\n\n\
         Shapes: {}\n\
         Steps: {}\n\
         Repetitions: {}\n\
         Alpha-channel: {}\n\
         Extension: {}\n\
         Size: {}",
        config.shape.label().to_lowercase(),
        config.iterations,
        config.repeat,
        config.alpha,
        config.extension,
        config.output_size,
    )
}

/// Inline keyboard (buttons) used for reviewer callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    /// One button per `(label, answer)` pair; callback data is
    /// `{prefix}:{ticket}:{answer}`.
    pub fn answers(prefix: &str, ticket: u64, options: &[(&str, &str)]) -> Self {
        let buttons = options
            .iter()
            .map(|(label, answer)| InlineButton {
                label: label.to_string(),
                callback_data: format!("{prefix}:{ticket}:{answer}"),
            })
            .collect();
        Self { buttons }
    }
}

//! Locators for the fixed conversational UI.

use serde::{Deserialize, Serialize};

use crate::traits::Locator;

/// Every element the session manager and turn executor touch.
///
/// Swapping the locator strategy means swapping this value; nothing in the
/// detector or executor hardcodes a selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContract {
    /// Identity (email) field on the entry page.
    pub identity_field: Locator,
    /// Secret (password) field on the entry page.
    pub secret_field: Locator,
    /// Terms consent checkbox.
    pub consent_control: Locator,
    /// Login submit button.
    pub submit_button: Locator,
    /// Chat input; its presence doubles as the post-login marker.
    pub chat_input: Locator,
    /// One rendered answer block.
    pub answer_block: Locator,
    /// One rendered user prompt block.
    pub prompt_block: Locator,
    /// Extended-reasoning mode toggle.
    pub mode_toggle: Locator,
}

impl Default for UiContract {
    fn default() -> Self {
        Self {
            identity_field: Locator::xpath(
                r#"//*[@id="root"]/div/div[2]/div/div/div[3]/div[1]/div/input"#,
            ),
            secret_field: Locator::xpath(
                r#"//*[@id="root"]/div/div[2]/div/div/div[4]/div[1]/div/input"#,
            ),
            consent_control: Locator::xpath(
                r#"//*[@id="root"]/div/div[2]/div/div/div[5]/div[1]/div/div[1]/div"#,
            ),
            submit_button: Locator::xpath(r#"//*[@id="root"]/div/div[2]/div/div/div[6]"#),
            chat_input: Locator::css("#chat-input"),
            answer_block: Locator::xpath("//div[contains(@class, 'ds-markdown')]"),
            prompt_block: Locator::xpath("//div[contains(@class, 'fbb737a4')]"),
            mode_toggle: Locator::xpath("//span[contains(text(), 'DeepThink (R1)')]"),
        }
    }
}

//! Prompt story_outline: A short dialogue that sets up an adventure outline,
//! optionally with a generated title card.

use std::io::Cursor;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Parameter};

use crate::render::{Render, RenderContext};
use crate::types::Role;

use super::Prompt;

const CARD_WIDTH: u32 = 96;
const CARD_HEIGHT: u32 = 48;

pub struct StoryOutline {
    schema: InputSchema,
}

impl StoryOutline {
    pub fn new() -> Self {
        Self {
            schema: InputSchema::new()
                .param(
                    Parameter::string("hero_name")
                        .required()
                        .length(1, 80)
                        .description("Name of the hero"),
                )
                .param(
                    Parameter::string("adventure_type")
                        .required()
                        .one_of(["fantasy", "sci-fi", "mystery"])
                        .description("Genre of the adventure"),
                )
                .param(
                    Parameter::boolean("include_art")
                        .default_value(false)
                        .description("Attach a generated title card image"),
                ),
        }
    }
}

impl Default for StoryOutline {
    fn default() -> Self {
        Self::new()
    }
}

fn setting(adventure_type: &str) -> &'static str {
    match adventure_type {
        "sci-fi" => "a derelict orbital station drifting past a dying star",
        "mystery" => "a fog-bound harbour town where the lighthouse went dark overnight",
        _ => "a kingdom where the old forest has started to move",
    }
}

fn palette(adventure_type: &str) -> ([u8; 3], [u8; 3]) {
    match adventure_type {
        "sci-fi" => ([10, 12, 40], [80, 200, 255]),
        "mystery" => ([20, 20, 20], [140, 120, 90]),
        _ => ([20, 60, 20], [230, 200, 90]),
    }
}

/// PNG title card: a vertical gradient in the genre palette with bands
/// derived from the hero's name.
pub fn title_card(hero_name: &str, adventure_type: &str) -> anyhow::Result<Vec<u8>> {
    let (top, bottom) = palette(adventure_type);
    let seed = hero_name
        .bytes()
        .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    let band = 4 + seed % 8;

    let img = image::RgbImage::from_fn(CARD_WIDTH, CARD_HEIGHT, |x, y| {
        let t = y as f32 / (CARD_HEIGHT - 1) as f32;
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t) as u8;
        let mut pixel = [mix(top[0], bottom[0]), mix(top[1], bottom[1]), mix(top[2], bottom[2])];
        if x.wrapping_add(seed) / band % 2 == 0 && y > CARD_HEIGHT / 3 && y < 2 * CARD_HEIGHT / 3 {
            pixel = pixel.map(|c| c.saturating_add(40));
        }
        image::Rgb(pixel)
    });

    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

#[async_trait]
impl Prompt for StoryOutline {
    fn name(&self) -> &str {
        "story_outline"
    }

    fn description(&self) -> &str {
        "Set up an adventure story outline for a named hero"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    async fn render(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        let hero = args.get("hero_name").and_then(Value::as_str).unwrap_or_default();
        let kind = args
            .get("adventure_type")
            .and_then(Value::as_str)
            .unwrap_or("fantasy");
        let include_art = args
            .get("include_art")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        ctx.say(
            Role::User,
            Render::Text(format!("I want an epic {kind} adventure starring {hero}.")),
        )?;
        ctx.say(
            Role::Assistant,
            Render::Text(format!(
                "Every legend starts somewhere. {hero}'s begins in {}.",
                setting(kind)
            )),
        )?;
        ctx.say(
            Role::User,
            Render::Text("What stands in the hero's way?".to_string()),
        )?;
        ctx.say(
            Role::Assistant,
            Render::Text(format!(
                "A rival who knows {hero}'s past, a deadline that cannot move, and a choice \
                 between the mission and a friend."
            )),
        )?;
        ctx.say(
            Role::User,
            Render::Text(
                "Turn this into a five-chapter outline with one sentence per chapter.".to_string(),
            ),
        )?;

        if include_art {
            ctx.say(
                Role::Assistant,
                Render::Text(format!("Here is a title card for {hero}'s story.")),
            )?;
            ctx.say(
                Role::Assistant,
                Render::Blob {
                    data: title_card(hero, kind)?,
                    mime_type: "image/png".to_string(),
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_card_is_png() {
        let bytes = title_card("Ada", "sci-fi").unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}

//! Growth recipe: a layered day/night program the appliance executes
//! standalone once downloaded. Recipes are immutable value objects; a new
//! recipe is a brand new `Recipe`, never a mutation of an old one.

use serde::{Deserialize, Serialize};

use crate::value::Timestamp;

const DAY_DURATION_SEC: i32 = 24 * 3600;
const CYCLE_START_DAYS_AGO: i64 = 7;
pub const RECIPE_VERSION: u8 = 7;
const LEDS_OFF: [u8; 4] = [0, 0, 0, 0];

/// Minimum age (seconds) a recipe must reach before regeneration replaces it
/// even if the candidate differs only in timestamps that aren't tracked here.
pub const MIN_REGEN_AGE_SEC: i64 = 48 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Period {
    duration: i32,
    led_vals: [u8; 4],
    temp_target: i16,
    water_target: i16,
    water_delay: i16,
}

impl Period {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.duration.to_le_bytes());
        buf.extend_from_slice(&self.led_vals);
        buf.extend_from_slice(&self.temp_target.to_le_bytes());
        buf.extend_from_slice(&self.water_target.to_le_bytes());
        buf.extend_from_slice(&self.water_delay.to_le_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Block {
    periods: Vec<Period>,
    rep_count: u8,
}

impl Block {
    fn write_header(&self, buf: &mut Vec<u8>) {
        buf.push(self.periods.len() as u8);
        buf.push(self.rep_count);
    }

    fn write_content(&self, buf: &mut Vec<u8>) {
        for p in &self.periods {
            p.write_to(buf);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Layer {
    blocks: Vec<Block>,
}

/// Inputs that determine whether layer A / layer B run their own day/night
/// program or sit idle. The third, structural layer slot is never
/// independently addressable and always encodes empty (see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerActiveness {
    pub layer_a: bool,
    pub layer_b: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    id: i32,
    cycle_start: i32,
    layers: [Layer; 3],
}

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("wrong led_vals length, want 4, got {0}")]
    WrongLedValsLength(usize),
}

impl Recipe {
    /// Builds a recipe as of `as_of`, with per-layer activeness, LED
    /// quartet, day/night temperature targets (°C), water target, water
    /// delay and day length (seconds).
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        as_of: Timestamp,
        led_vals: &[u8],
        temp_target_day: f64,
        temp_target_night: f64,
        water_target: i16,
        water_delay_sec: i32,
        day_length_sec: i32,
        activeness: LayerActiveness,
    ) -> Result<Self, RecipeError> {
        if led_vals.len() != 4 {
            return Err(RecipeError::WrongLedValsLength(led_vals.len()));
        }
        let led_vals: [u8; 4] = [led_vals[0], led_vals[1], led_vals[2], led_vals[3]];

        let id = as_of as i32;
        let seven_days_ago = as_of - CYCLE_START_DAYS_AGO * DAY_DURATION_SEC as i64;
        let cycle_start = (seven_days_ago - seven_days_ago.rem_euclid(DAY_DURATION_SEC as i64)) as i32;

        let day_len_sec = day_length_sec;
        let night_len_sec = DAY_DURATION_SEC - day_length_sec;
        let i16_temp_day = (temp_target_day * 100.0).round() as i16;
        let i16_temp_night = (temp_target_night * 100.0).round() as i16;

        let skip_period = Period {
            duration: DAY_DURATION_SEC,
            led_vals: LEDS_OFF,
            temp_target: i16_temp_day,
            water_target,
            water_delay: -1,
        };

        let active_layer = || Layer {
            blocks: vec![
                Block {
                    periods: vec![skip_period.clone()],
                    rep_count: (CYCLE_START_DAYS_AGO - 1) as u8,
                },
                Block {
                    periods: vec![
                        Period {
                            duration: day_len_sec,
                            led_vals,
                            temp_target: i16_temp_day,
                            water_target,
                            water_delay: water_delay_sec as i16,
                        },
                        Period {
                            duration: night_len_sec,
                            led_vals: LEDS_OFF,
                            temp_target: i16_temp_night,
                            water_target: 0,
                            water_delay: water_delay_sec as i16,
                        },
                    ],
                    rep_count: 100,
                },
            ],
        };

        let inactive_layer = || Layer {
            blocks: vec![Block {
                periods: vec![skip_period.clone()],
                rep_count: 100,
            }],
        };

        let empty_layer = || Layer { blocks: vec![] };

        let layer_a = if activeness.layer_a {
            active_layer()
        } else {
            inactive_layer()
        };
        let layer_b = if activeness.layer_b {
            active_layer()
        } else {
            inactive_layer()
        };

        Ok(Recipe {
            id,
            cycle_start,
            layers: [layer_a, layer_b, empty_layer()],
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Little-endian binary encoding, see `SPEC_FULL.md` §4.2.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.cycle_start.to_le_bytes());
        buf.push((self.layers.len() - 1) as u8);
        buf.push(RECIPE_VERSION);
        for layer in &self.layers {
            buf.push(layer.blocks.len() as u8);
        }
        for layer in &self.layers {
            for block in &layer.blocks {
                block.write_header(&mut buf);
            }
        }
        for layer in &self.layers {
            for block in &layer.blocks {
                block.write_content(&mut buf);
            }
        }
        buf
    }

    /// True iff `other` has the same layer program, ignoring `id`/`cycle_start`.
    pub fn equal_except_timestamps(&self, other: &Recipe) -> bool {
        self.layers == other.layers
    }

    /// Absolute difference, in seconds, between this recipe's creation time
    /// and `other`'s.
    pub fn age_difference(&self, other: &Recipe) -> i64 {
        (self.id as i64 - other.id as i64).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_wrong_led_vals_length() {
        let err = Recipe::create(
            0,
            &[1, 2, 3],
            20.0,
            18.0,
            50,
            0,
            12 * 3600,
            LayerActiveness {
                layer_a: true,
                layer_b: true,
            },
        )
        .unwrap_err();
        matches!(err, RecipeError::WrongLedValsLength(3));
    }

    // S6: both layers active, LEDs {01,02,03,04}, day 23.0C, night 20.0C,
    // water target 70, water delay 8h, day length 15h, asOf=1691777926.
    #[test]
    fn s6_recipe_encoding_matches_fixture() {
        let recipe = Recipe::create(
            1_691_777_926,
            &[1, 2, 3, 4],
            23.0,
            20.0,
            70,
            8 * 3600,
            15 * 3600,
            LayerActiveness {
                layer_a: true,
                layer_b: true,
            },
        )
        .unwrap();

        let bytes = recipe.to_bytes();
        let expected: Vec<u8> = vec![
            0x86, 0x7b, 0xd6, 0x64, 0x80, 0x3f, 0xcc, 0x64, 0x02, 0x07, 0x02, 0x02, 0x00, 0x01,
            0x06, 0x02, 0x64, 0x01, 0x06, 0x02, 0x64, 0x80, 0x51, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x00, 0xfc, 0x08, 0x46, 0x00, 0xff, 0xff, 0xf0, 0xd2, 0x00, 0x00, 0x01, 0x02, 0x03,
            0x04, 0xfc, 0x08, 0x46, 0x00, 0x80, 0x70, 0x90, 0x7e, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0xd0, 0x07, 0x00, 0x00, 0x80, 0x70, 0x80, 0x51, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x00, 0xfc, 0x08, 0x46, 0x00, 0xff, 0xff, 0xf0, 0xd2, 0x00, 0x00, 0x01, 0x02, 0x03,
            0x04, 0xfc, 0x08, 0x46, 0x00, 0x80, 0x70, 0x90, 0x7e, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0xd0, 0x07, 0x00, 0x00, 0x80, 0x70,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn third_layer_is_always_structurally_empty() {
        let recipe = Recipe::create(
            1_691_777_926,
            &[0, 0, 0, 0],
            20.0,
            18.0,
            50,
            0,
            12 * 3600,
            LayerActiveness {
                layer_a: false,
                layer_b: false,
            },
        )
        .unwrap();
        assert!(recipe.layers[2].blocks.is_empty());
    }

    #[test]
    fn inactive_layer_is_single_skip_block_repeated_100_times() {
        let recipe = Recipe::create(
            1_691_777_926,
            &[0, 0, 0, 0],
            20.0,
            18.0,
            50,
            0,
            12 * 3600,
            LayerActiveness {
                layer_a: false,
                layer_b: true,
            },
        )
        .unwrap();
        assert_eq!(recipe.layers[0].blocks.len(), 1);
        assert_eq!(recipe.layers[0].blocks[0].periods.len(), 1);
        assert_eq!(recipe.layers[0].blocks[0].rep_count, 100);
        assert_eq!(recipe.layers[1].blocks.len(), 2);
    }

    #[test]
    fn equal_except_timestamps_ignores_id_and_cycle_start() {
        let active = LayerActiveness {
            layer_a: true,
            layer_b: true,
        };
        let r1 = Recipe::create(1000, &[1, 2, 3, 4], 20.0, 18.0, 50, 0, 12 * 3600, active).unwrap();
        let r2 = Recipe::create(2000, &[1, 2, 3, 4], 20.0, 18.0, 50, 0, 12 * 3600, active).unwrap();
        assert!(r1.equal_except_timestamps(&r2));
        assert_ne!(r1.id(), r2.id());
    }

    #[test]
    fn equal_except_timestamps_detects_content_drift() {
        let active = LayerActiveness {
            layer_a: true,
            layer_b: true,
        };
        let r1 = Recipe::create(1000, &[1, 2, 3, 4], 20.0, 18.0, 50, 0, 12 * 3600, active).unwrap();
        let r2 = Recipe::create(1000, &[1, 2, 3, 4], 21.0, 18.0, 50, 0, 12 * 3600, active).unwrap();
        assert!(!r1.equal_except_timestamps(&r2));
    }

    #[test]
    fn age_difference_is_absolute_seconds_between_ids() {
        let active = LayerActiveness {
            layer_a: true,
            layer_b: true,
        };
        let r1 = Recipe::create(1000, &[0, 0, 0, 0], 20.0, 18.0, 50, 0, 12 * 3600, active).unwrap();
        let r2 = Recipe::create(1500, &[0, 0, 0, 0], 20.0, 18.0, 50, 0, 12 * 3600, active).unwrap();
        assert_eq!(r1.age_difference(&r2), 500);
        assert_eq!(r2.age_difference(&r1), 500);
    }
}

//! Peepers - voice-controlled animatronic eyes
//!
//! This library provides the core of the Peepers agent:
//! - Servo control through a PCA9685 PWM driver
//! - Eased motion and an idle eye animation loop
//! - Microphone arbitration, STT and interruptible TTS playback
//! - A wake-phrase-gated conversation state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Conversation State Machine             │
//! │   Idle → WaitingForWake → Active → ShuttingDown     │
//! └───────┬───────────────┬─────────────────┬───────────┘
//!         │               │                 │
//! ┌───────▼──────┐ ┌──────▼───────┐ ┌───────▼──────────┐
//! │     Eyes     │ │  Microphone  │ │  Speech output   │
//! │ idle loop,   │ │   arbiter    │ │  + barge-in      │
//! │ gestures     │ └──────┬───────┘ └───────┬──────────┘
//! └───────┬──────┘        │                 │
//! ┌───────▼──────┐ ┌──────▼─────────────────▼──────────┐
//! │ Motion, PWM  │ │        STT  │  TTS  │  Chat        │
//! └──────────────┘ └───────────────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod eyes;
pub mod hardware;
pub mod motion;
pub mod voice;

pub use chat::{ChatMessage, ChatModel, ConversationHistory, OpenAiChat, Role};
pub use config::Config;
pub use conversation::{Conversation, ConversationState, LivenessClock};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use eyes::Eyes;
pub use hardware::{RegisterBus, ServoDriver};
pub use motion::{MotionProfile, MotionStep, ease_to};

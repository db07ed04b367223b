//! Unit test modules.

mod backoff_test;
mod presence_test;
mod query_codec_test;
mod rank_thresholds_test;
mod schedule_test;
mod streak_test;

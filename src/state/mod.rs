pub mod emoji;
pub mod guild;
pub mod member;
pub mod member_list;
pub mod mute;
pub mod note;
pub mod read;
pub mod relationship;
pub mod summary;
pub mod thread;

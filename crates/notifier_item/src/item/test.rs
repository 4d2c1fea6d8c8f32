use std::collections::HashMap;

use pretty_assertions::assert_eq;
use zbus::zvariant::{OwnedValue, Value};

use super::*;
use crate::names::MENU_OBJECT;

fn call(path: &str, interface: &str, member: &str) -> Message {
    let mut msg = Message::method_call(":1.1", path, interface, member).unwrap().with_sender(":1.77").unwrap();
    msg.set_serial(3);
    msg
}

fn get(property: &str) -> Message {
    call(ITEM_OBJECT, PROPERTIES_INTERFACE, "Get").with_body(&(ITEM_INTERFACE, property)).unwrap()
}

fn reply_of(result: HandlerResult) -> Message {
    match result {
        HandlerResult::Handled(Some(reply)) => reply,
        other => panic!("expected a reply, got {:?}", other),
    }
}

#[test]
fn test_get_string_property() {
    let mut item = StatusNotifierItem::new();
    let reply = reply_of(item.handle_message(&get("Status")).unwrap());
    assert_eq!(reply.message_type(), MessageType::MethodReturn);
    assert_eq!(reply.reply_serial(), Some(3));
    assert_eq!(reply.signature().as_str(), "v");
    let (value,): (Value<'_>,) = reply.body().unwrap();
    assert_eq!(value.value_signature().as_str(), "s");
    assert_eq!(value, Value::from("Active"));
}

#[test]
fn test_get_boolean_and_object_path() {
    let mut item = StatusNotifierItem::new();
    let reply = reply_of(item.handle_message(&get("ItemIsMenu")).unwrap());
    let (value,): (Value<'_>,) = reply.body().unwrap();
    assert_eq!(value, Value::from(false));

    let reply = reply_of(item.handle_message(&get("Menu")).unwrap());
    let (value,): (Value<'_>,) = reply.body().unwrap();
    assert_eq!(value.value_signature().as_str(), "o");
}

#[test]
fn test_get_pixmap_advances_offsets() {
    let mut item = StatusNotifierItem::new();
    let reply = reply_of(item.handle_message(&get("IconPixmap")).unwrap());
    let (value,): (OwnedValue,) = reply.body().unwrap();
    let pixmaps: Vec<(i32, i32, Vec<u8>)> = value.try_into().unwrap();
    assert_eq!(pixmaps.len(), 1);
    let (width, height, data) = &pixmaps[0];
    assert_eq!((*width, *height), (256, 256));
    assert_eq!(&data[..4], &[0xff, 0, 0, 0]);
    assert_eq!(item.offsets(), PixmapOffsets { x: 1, y: 2 });

    let reply = reply_of(item.handle_message(&get("IconPixmap")).unwrap());
    let (value,): (OwnedValue,) = reply.body().unwrap();
    let pixmaps: Vec<(i32, i32, Vec<u8>)> = value.try_into().unwrap();
    assert_eq!(&pixmaps[0].2[..4], &[0xff, 0, 2, 1]);
}

#[test]
fn test_get_attention_pixmap_is_empty() {
    let mut item = StatusNotifierItem::new();
    let reply = reply_of(item.handle_message(&get("AttentionIconPixmap")).unwrap());
    let (value,): (Value<'_>,) = reply.body().unwrap();
    assert_eq!(value.value_signature().as_str(), "a(iiay)");
    assert_eq!(item.offsets(), PixmapOffsets::default());
}

#[test]
fn test_get_unknown_property_is_not_handled() {
    let mut item = StatusNotifierItem::new();
    assert_eq!(item.handle_message(&get("ToolTip")).unwrap(), HandlerResult::NotYetHandled);
}

#[test]
fn test_get_with_other_interface_is_not_handled() {
    let mut item = StatusNotifierItem::new();
    let msg = call(ITEM_OBJECT, PROPERTIES_INTERFACE, "Get").with_body(&("org.freedesktop.StatusNotifierItem", "Status")).unwrap();
    assert_eq!(item.handle_message(&msg).unwrap(), HandlerResult::NotYetHandled);
}

#[test]
fn test_get_with_malformed_arguments_is_not_handled() {
    let mut item = StatusNotifierItem::new();
    let msg = call(ITEM_OBJECT, PROPERTIES_INTERFACE, "Get").with_body(&(42u32,)).unwrap();
    assert_eq!(item.handle_message(&msg).unwrap(), HandlerResult::NotYetHandled);
}

#[test]
fn test_get_all() {
    let mut item = StatusNotifierItem::new();
    let msg = call(ITEM_OBJECT, PROPERTIES_INTERFACE, "GetAll").with_body(&(ITEM_INTERFACE,)).unwrap();
    let reply = reply_of(item.handle_message(&msg).unwrap());
    assert_eq!(reply.signature().as_str(), "a{sv}");

    let (properties,): (HashMap<String, OwnedValue>,) = reply.body().unwrap();
    assert_eq!(properties.len(), Property::ALL.len());
    for property in Property::ALL {
        assert!(properties.contains_key(property.name()), "missing {}", property.name());
    }
    assert_eq!(properties["Id"], OwnedValue::from(Value::from("pulsetray")));
    assert_eq!(item.offsets(), PixmapOffsets { x: 1, y: 2 });
}

#[test]
fn test_get_all_other_interface_is_not_handled() {
    let mut item = StatusNotifierItem::new();
    let msg = call(ITEM_OBJECT, PROPERTIES_INTERFACE, "GetAll").with_body(&("org.mpris.MediaPlayer2",)).unwrap();
    assert_eq!(item.handle_message(&msg).unwrap(), HandlerResult::NotYetHandled);
    assert_eq!(item.offsets(), PixmapOffsets::default());
}

#[test]
fn test_item_methods_get_empty_reply() {
    let mut item = StatusNotifierItem::new();
    for member in ["Activate", "SecondaryActivate", "ContextMenu"] {
        let msg = call(ITEM_OBJECT, ITEM_INTERFACE, member).with_body(&(10i32, 20i32)).unwrap();
        let reply = reply_of(item.handle_message(&msg).unwrap());
        assert_eq!(reply.signature().as_str(), "");
    }
}

#[test]
fn test_signals_and_replies_are_not_handled() {
    let mut item = StatusNotifierItem::new();
    let signal = Message::signal(ITEM_OBJECT, ITEM_INTERFACE, "NewIcon").unwrap();
    assert_eq!(item.handle_message(&signal).unwrap(), HandlerResult::NotYetHandled);
    let reply = Message::method_return(&get("Status"));
    assert_eq!(item.handle_message(&reply).unwrap(), HandlerResult::NotYetHandled);
}

#[test]
fn test_introspect() {
    let mut item = StatusNotifierItem::new();
    let reply = reply_of(item.handle_message(&call(ITEM_OBJECT, INTROSPECTABLE_INTERFACE, "Introspect")).unwrap());
    let (xml,): (String,) = reply.body().unwrap();
    assert!(xml.contains("<interface name=\"org.kde.StatusNotifierItem\">"));
    assert!(xml.contains("<property name=\"IconPixmap\" type=\"a(iiay)\" access=\"read\"/>"));

    let reply = reply_of(item.handle_message(&call(MENU_OBJECT, INTROSPECTABLE_INTERFACE, "Introspect")).unwrap());
    let (xml,): (String,) = reply.body().unwrap();
    assert!(xml.ends_with("<node/>\n"));
}

#[test]
fn test_new_icon_signal() {
    let item = StatusNotifierItem::new();
    let signal = item.new_icon_signal().unwrap();
    assert_eq!(signal.message_type(), MessageType::Signal);
    assert_eq!(signal.path().unwrap().as_str(), "/StatusNotifierItem");
    assert_eq!(signal.interface().unwrap().as_str(), "org.kde.StatusNotifierItem");
    assert_eq!(signal.member().unwrap().as_str(), "NewIcon");
    assert_eq!(signal.signature().as_str(), "");
}

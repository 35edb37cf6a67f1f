use serde::{Deserialize, Serialize};

use crate::signature::Point;

/// The kinds of pointer events a signature surface listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointerEventKind {
    MouseDown,
    MouseMove,
    MouseUp,
    MouseLeave,
    TouchStart,
    TouchMove,
    TouchEnd,
    TouchCancel,
}

/// The operation of the signature surface that an event is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceAction {
    Begin,
    Extend,
    End,
}

/// The mapping between pointer events and surface operations. Leaving the surface or
/// cancelling a touch ends the stroke just as releasing the pointer does.
pub const EVENT_BINDINGS: [(PointerEventKind, SurfaceAction); 8] = [
    (PointerEventKind::MouseDown, SurfaceAction::Begin),
    (PointerEventKind::MouseMove, SurfaceAction::Extend),
    (PointerEventKind::MouseUp, SurfaceAction::End),
    (PointerEventKind::MouseLeave, SurfaceAction::End),
    (PointerEventKind::TouchStart, SurfaceAction::Begin),
    (PointerEventKind::TouchMove, SurfaceAction::Extend),
    (PointerEventKind::TouchEnd, SurfaceAction::End),
    (PointerEventKind::TouchCancel, SurfaceAction::End),
];

/// Look up the surface operation bound to an event kind.
pub fn action_for(kind: PointerEventKind) -> Option<SurfaceAction> {
    EVENT_BINDINGS
        .iter()
        .find(|(bound_kind, _)| *bound_kind == kind)
        .map(|(_, action)| *action)
}

/// A pointer event as reported by the page, with its position in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    /// `None` for events which carry no position, such as the end of a touch.
    pub position: Option<Point>,
}

impl PointerEvent {
    pub fn mouse(kind: PointerEventKind, x: f32, y: f32) -> Self {
        PointerEvent {
            kind,
            position: Some(Point { x, y }),
        }
    }

    /// A touch event only takes into account the first of the active touches.
    pub fn touch(kind: PointerEventKind, touches: &[Point]) -> Self {
        PointerEvent {
            kind,
            position: touches.first().copied(),
        }
    }
}

/// Turn a recorded stroke into the sequence of mouse events that would draw it.
pub fn stroke_to_events(points: &[Point]) -> Vec<PointerEvent> {
    let mut events = Vec::with_capacity(points.len() + 1);
    let Some((first, rest)) = points.split_first() else {
        return events;
    };

    events.push(PointerEvent::mouse(
        PointerEventKind::MouseDown,
        first.x,
        first.y,
    ));
    for point in rest {
        events.push(PointerEvent::mouse(
            PointerEventKind::MouseMove,
            point.x,
            point.y,
        ));
    }
    events.push(PointerEvent {
        kind: PointerEventKind::MouseUp,
        position: None,
    });

    events
}

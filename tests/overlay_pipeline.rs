use detection_viewer::overlay::{
    DualSurface, OverlayElement, OverlayOptions, OverlayRenderer, Size, SurfaceKind,
    SurfacePoint, ViewMode,
};
use detection_viewer::ProcessedImage;
use detection_viewer::stream::{
    ControllerSettings, ControllerState, RecordingNotifier, ReplayTransport, SessionToken,
    StreamingSessionController,
};

const STREAM: &str = concat!(
    r#"{"image":"b.png","detections":[{"id":"t1","confidence":0.92,"type":"tyre","location":{"lat":0,"lng":0},"#,
    r#""boundingBox":{"topLeft":{"lat":100,"lng":100},"bottomRight":{"lat":200,"lng":300}},"#,
    r#""segmentation":[[100,100,300,100,300,200,100,200]]}]}"#,
    "\n",
    r#"{"firstDetection":true}"#,
    "\n",
    r#"{"image":"b.png","detections":[{"confidence":0.1,"type":"bag","location":{"lat":1,"lng":1}},"#,
    r#"{"confidence":0.2,"type":"bag","location":{"lat":2,"lng":2}}]}"#,
    "\n",
    r#"{"image":"c.png","detections":[{"confidence":0.55,"type":"bag","location":{"lat":250,"lng":500}}]}"#,
    "\n",
    r#"{"completed":true,"totalDetections":2}"#,
    "\n",
);

fn run_stream(chunk_bytes: usize) -> StreamingSessionController<ReplayTransport, RecordingNotifier> {
    let mut controller = StreamingSessionController::new(
        ReplayTransport::from_bytes(STREAM.as_bytes(), chunk_bytes),
        RecordingNotifier::default(),
        ControllerSettings::new("http://localhost:5000/", "realtime"),
        SessionToken::from_string("pipeline"),
    );
    controller.start();
    assert_eq!(controller.run_until_done(), ControllerState::Complete);
    controller
}

#[test]
fn duplicate_result_keeps_first_and_chunking_is_irrelevant() {
    let reference = run_stream(8192).snapshot();
    assert_eq!(reference.images.len(), 2);
    let b = &reference.images[0];
    assert_eq!(b.file_name, "b.png");
    assert_eq!(b.detections.len(), 1);
    assert_eq!(b.detections[0].category, "tyre");

    for chunk_bytes in [1, 7, 64, 333] {
        let snapshot = run_stream(chunk_bytes).snapshot();
        let names: Vec<&str> = snapshot.images.iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.png", "c.png"], "chunk size {}", chunk_bytes);
        let first = &snapshot.images[0].detections;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, b.detections[0].id);
        assert_eq!(first[0].bounding_box, b.detections[0].bounding_box);
        assert_eq!(first[0].mask, b.detections[0].mask);
        assert_eq!(snapshot.total_detections, Some(2));
    }
}

#[test]
fn streamed_detections_project_onto_loaded_surface() {
    let controller = run_stream(64);
    let image = controller.session().image("b.png").expect("b.png present").clone();

    let dir = tempfile::tempdir().unwrap();
    let processed = dir.path().join("b_annotated.png");
    image::RgbImage::new(1000, 500).save(&processed).unwrap();

    let mut surface = DualSurface::new(Size::new(400.0, 400.0));
    let mut renderer = OverlayRenderer::new(OverlayOptions::default());

    // Nothing renders until the processed image reports its natural size.
    assert_eq!(surface.view_state().unwrap().natural, None);
    assert!(renderer
        .render(&surface.view_state().unwrap(), &image)
        .is_empty());

    assert!(surface.load(SurfaceKind::Processed, processed.to_str().unwrap()));
    let view = surface.view_state().unwrap();
    let scene = renderer.render(&view, &image).clone();
    assert_eq!(scene.elements.len(), 3);

    let rect = scene
        .elements
        .iter()
        .find_map(|el| match el {
            OverlayElement::Box { rect, .. } => Some(*rect),
            _ => None,
        })
        .expect("box element");
    assert!((rect.x - 40.0).abs() < 1e-9);
    assert!((rect.y - 140.0).abs() < 1e-9);
    assert!((rect.width - 80.0).abs() < 1e-9);
    assert!((rect.height - 40.0).abs() < 1e-9);

    let svg = scene.to_svg();
    assert!(svg.contains("tyre (92%)"));
    assert!(svg.contains("rgba(255, 0, 0, 0.3)"));

    // Entering full screen blocks rendering until the container is measured.
    surface.set_fullscreen(true);
    assert!(surface.view_state().is_none());
    surface.measure(Size::new(800.0, 800.0));
    let scene = renderer.render(&surface.view_state().unwrap(), &image);
    let rect = scene
        .elements
        .iter()
        .find_map(|el| match el {
            OverlayElement::Box { rect, .. } => Some(*rect),
            _ => None,
        })
        .expect("box element");
    assert!((rect.x - 80.0).abs() < 1e-9);

    // Clicking the label filters to its category.
    assert!(renderer.click(SurfacePoint { x: 90.0, y: 270.0 }));
    assert_eq!(renderer.options().selected_category.as_deref(), Some("tyre"));

    surface.set_mode(ViewMode::Original);
    assert!(renderer
        .render(&surface.view_state().unwrap(), &image)
        .is_empty());
}

#[test]
fn point_only_detection_renders_label_without_box() {
    let controller = run_stream(8192);
    let image = controller.session().image("c.png").expect("c.png present");
    assert!(image.detections[0].bounding_box.is_degenerate());

    let mut surface = DualSurface::new(Size::new(400.0, 400.0));
    surface.image_loaded(SurfaceKind::Processed, Size::new(1000.0, 500.0));
    let mut renderer = OverlayRenderer::new(OverlayOptions::default());
    let scene = renderer.render(&surface.view_state().unwrap(), image);

    assert_eq!(scene.elements.len(), 1);
    let OverlayElement::Label { rect, text, .. } = &scene.elements[0] else {
        panic!("expected label");
    };
    assert_eq!(text, "bag (55%)");
    // Point (500, 250) projects to (200, 200); the label sits above it.
    assert!((rect.x - 200.0).abs() < 1e-9);
    assert!((rect.y - 176.0).abs() < 1e-9);
}

#[test]
fn overlay_follows_image_across_sessions() {
    let session_image = |body: &str, file_name: &str| {
        let mut controller = StreamingSessionController::new(
            ReplayTransport::from_bytes(body.as_bytes(), 64),
            RecordingNotifier::default(),
            ControllerSettings::new("http://localhost:5000/", "realtime"),
            SessionToken::from_string("pipeline"),
        );
        controller.start();
        assert_eq!(controller.run_until_done(), ControllerState::Complete);
        controller.session().image(file_name).expect("image present").clone()
    };
    let a = session_image(
        concat!(
            r#"{"image":"a.png","detections":[{"confidence":0.9,"type":"tyre","location":{"lat":0,"lng":0},"#,
            r#""boundingBox":{"topLeft":{"lat":0,"lng":0},"bottomRight":{"lat":10,"lng":10}}}]}"#,
            "\n",
            r#"{"completed":true}"#,
            "\n",
        ),
        "a.png",
    );
    let z = session_image(
        concat!(
            r#"{"image":"z.png","detections":[{"confidence":0.9,"type":"tyre","location":{"lat":0,"lng":0},"#,
            r#""boundingBox":{"topLeft":{"lat":400,"lng":800},"bottomRight":{"lat":450,"lng":900}}}]}"#,
            "\n",
            r#"{"completed":true}"#,
            "\n",
        ),
        "z.png",
    );
    assert_eq!(a.id, z.id);

    let mut surface = DualSurface::new(Size::new(400.0, 400.0));
    surface.image_loaded(SurfaceKind::Processed, Size::new(1000.0, 500.0));
    let view = surface.view_state().unwrap();
    let mut renderer = OverlayRenderer::new(OverlayOptions::default());

    let box_origin = |renderer: &mut OverlayRenderer, image: &ProcessedImage| {
        renderer
            .render(&view, image)
            .elements
            .iter()
            .find_map(|el| match el {
                OverlayElement::Box { rect, .. } => Some((rect.x, rect.y)),
                _ => None,
            })
            .expect("box element")
    };
    assert_eq!(box_origin(&mut renderer, &a), (0.0, 100.0));
    let (x, y) = box_origin(&mut renderer, &z);
    assert!((x - 320.0).abs() < 1e-9, "x = {}", x);
    assert!((y - 260.0).abs() < 1e-9, "y = {}", y);
}
